use std::{fmt::Display, sync::Arc};

use camino::Utf8Path;
use tracing::warn;

use crate::{
    catalog::path_config::PathConfigurationRepository,
    core::{scheduler::JobScheduler, storage::ObjectStore, work_dir::WorkDir, worker::VariantJob},
    model::repository::AssetRepository,
    processing::mime::MimeTypeDetector,
};

pub mod fetch_variant;
pub mod store_asset;

/// Everything the workflows need, bundled so call sites take one parameter.
/// All collaborators sit behind ports; the scheduler is the handle into the
/// worker pool.
#[derive(Clone)]
pub struct Services {
    pub repository: Arc<dyn AssetRepository>,
    pub object_store: Arc<dyn ObjectStore>,
    pub path_configs: Arc<dyn PathConfigurationRepository>,
    pub mime_detector: Arc<dyn MimeTypeDetector>,
    pub scheduler: JobScheduler<VariantJob>,
    pub work_dir: Arc<WorkDir>,
    /// Bucket all variants of this deployment are stored under.
    pub bucket: String,
}

/// Object keys are path-like: the asset path plus a unique file stem, so a
/// local store maps them straight onto the filesystem.
fn object_key(path: &str, file_stem: impl Display, extension: &str) -> String {
    format!("{}/{}.{}", path.trim_matches('/'), file_stem, extension)
}

/// Best-effort removal of work-dir scratch files, on success and failure
/// paths alike. Paths that were never written are fine.
async fn remove_scratch_files(paths: &[&Utf8Path]) {
    for path in paths {
        if let Err(err) = tokio::fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(%path, %err, "could not remove scratch file");
            }
        }
    }
}
