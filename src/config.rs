use camino::{Utf8Path as Path, Utf8PathBuf as PathBuf};
use color_eyre::eyre::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TomlVariantGeneration {
    queue_size: Option<usize>,
    workers: Option<usize>,
    synchronous_priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TomlStorage {
    root: String,
    bucket: Option<String>,
    work_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TomlConfig {
    #[serde(rename = "VariantGeneration")]
    pub variant_generation: Option<TomlVariantGeneration>,
    #[serde(rename = "Storage")]
    pub storage: TomlStorage,
}

/// Scheduler and worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantGeneration {
    /// Bound of each scheduler lane; full lanes suspend producers.
    pub queue_size: usize,
    pub workers: usize,
    /// Weight of the synchronous lane, within `[1, 100]`.
    pub synchronous_priority: u8,
}

impl Default for VariantGeneration {
    fn default() -> VariantGeneration {
        VariantGeneration {
            queue_size: 64,
            workers: 4,
            synchronous_priority: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    pub root: PathBuf,
    pub bucket: String,
    /// Scratch space parent; the system temp dir when unset.
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub variant_generation: VariantGeneration,
    pub storage: Storage,
}

pub async fn read_config(path: &Path) -> Result<Config> {
    let toml_str = tokio::fs::read_to_string(path)
        .await
        .context(format!("Error reading config file {}", path))?;
    parse_config(&toml_str)
}

fn parse_config(toml_str: &str) -> Result<Config> {
    let toml_config: TomlConfig = toml::from_str(toml_str).context("Error parsing config file")?;
    let defaults = VariantGeneration::default();
    let variant_generation = match toml_config.variant_generation {
        Some(vg) => VariantGeneration {
            queue_size: vg.queue_size.unwrap_or(defaults.queue_size),
            workers: vg.workers.unwrap_or(defaults.workers),
            synchronous_priority: vg.synchronous_priority.unwrap_or(defaults.synchronous_priority),
        },
        None => defaults,
    };
    if variant_generation.queue_size == 0 {
        bail!("VariantGeneration queue-size must be at least 1");
    }
    if variant_generation.workers == 0 {
        bail!("VariantGeneration workers must be at least 1");
    }
    if !(1..=100).contains(&variant_generation.synchronous_priority) {
        bail!(
            "VariantGeneration synchronous-priority must be within 1..=100, got {}",
            variant_generation.synchronous_priority
        );
    }
    let storage = Storage {
        root: toml_config.storage.root.into(),
        bucket: toml_config
            .storage
            .bucket
            .unwrap_or_else(|| String::from("assets")),
        work_dir: toml_config.storage.work_dir.map(PathBuf::from),
    };
    Ok(Config {
        variant_generation,
        storage,
    })
}
