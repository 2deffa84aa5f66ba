use camino::{Utf8Path, Utf8PathBuf};
use eyre::{eyre, Context, Result};
use tempfile::TempDir;
use uuid::Uuid;

/// Scratch directory for in-flight job files (streamed uploads, rendered
/// variants awaiting upload). Created once at startup, handed to whoever
/// needs to mint temporary destinations, and removed when dropped. There is
/// no process-global temp state; every path below is owned by exactly one
/// job until it is flushed to the object store.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
    path: Utf8PathBuf,
}

impl WorkDir {
    pub fn new() -> Result<WorkDir> {
        let dir = tempfile::tempdir().wrap_err("could not create working directory")?;
        Self::from_temp_dir(dir)
    }

    /// Place the working directory under `parent`, for setups where temp
    /// files must live on the same filesystem as the object store root.
    pub fn in_dir(parent: &Utf8Path) -> Result<WorkDir> {
        let dir = tempfile::tempdir_in(parent)
            .wrap_err_with(|| format!("could not create working directory in {}", parent))?;
        Self::from_temp_dir(dir)
    }

    fn from_temp_dir(dir: TempDir) -> Result<WorkDir> {
        let path = Utf8Path::from_path(dir.path())
            .ok_or_else(|| eyre!("working directory path is not valid UTF-8"))?
            .to_owned();
        Ok(WorkDir { dir, path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Mint a fresh file path inside the working directory. The file itself
    /// is not created; names never collide (uuid v4).
    pub fn new_file(&self, extension: &str) -> Utf8PathBuf {
        self.path.join(format!("{}.{}", Uuid::new_v4(), extension))
    }

    /// Remove the directory and everything in it.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.dir
            .close()
            .wrap_err_with(|| format!("could not remove working directory {}", path))
    }
}
