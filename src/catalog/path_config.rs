use async_trait::async_trait;
use eyre::Result;
use serde::{Deserialize, Serialize};

use super::transformation::{ImageFormat, Transformation};

/// Which low-quality placeholder implementations to compute for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LqipModes {
    pub blurhash: bool,
    pub thumbhash: bool,
}

impl LqipModes {
    pub const NONE: LqipModes = LqipModes {
        blurhash: false,
        thumbhash: false,
    };

    pub const ALL: LqipModes = LqipModes {
        blurhash: true,
        thumbhash: true,
    };

    pub fn any(&self) -> bool {
        self.blurhash || self.thumbhash
    }
}

/// Fully resolved policy for one path: what may be uploaded there, how the
/// original is normalized, and which variants to render eagerly.
#[derive(Debug, Clone, PartialEq)]
pub struct PathConfiguration {
    /// MIME types accepted for upload. Empty means everything is rejected.
    pub allowed_content_types: Vec<String>,
    pub lqip: LqipModes,
    /// Transformations rendered at background priority right after the
    /// asset becomes ready, so first readers don't pay generation latency.
    pub eager_variants: Vec<Transformation>,
    /// Placeholders are only computed for renders whose longest side is at
    /// most this many pixels; hashing a huge image is wasted work for a
    /// blur-sized preview.
    pub lqip_max_dimension: u32,
    /// Originals larger than this are scaled down during pre-processing.
    pub max_width: u32,
    pub max_height: u32,
    /// Encoding the normalized original is stored in.
    pub canonical_format: ImageFormat,
    pub cache_control: Option<String>,
}

impl Default for PathConfiguration {
    fn default() -> PathConfiguration {
        PathConfiguration {
            allowed_content_types: vec![
                "image/jpeg".to_owned(),
                "image/png".to_owned(),
                "image/webp".to_owned(),
                "image/gif".to_owned(),
                "image/avif".to_owned(),
            ],
            lqip: LqipModes::ALL,
            lqip_max_dimension: 2048,
            eager_variants: Vec::new(),
            max_width: 4096,
            max_height: 4096,
            canonical_format: ImageFormat::Source,
            cache_control: None,
        }
    }
}

impl PathConfiguration {
    pub fn allows_content_type(&self, mime: &str) -> bool {
        self.allowed_content_types.iter().any(|ct| ct == mime)
    }
}

/// Per-segment override; absent fields inherit from the parent segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathConfigurationOverride {
    pub allowed_content_types: Option<Vec<String>>,
    pub lqip: Option<LqipModes>,
    pub lqip_max_dimension: Option<u32>,
    pub eager_variants: Option<Vec<Transformation>>,
    pub max_dimensions: Option<(u32, u32)>,
    pub canonical_format: Option<ImageFormat>,
    pub cache_control: Option<String>,
}

impl PathConfigurationOverride {
    fn apply(&self, config: &mut PathConfiguration) {
        if let Some(allowed) = &self.allowed_content_types {
            config.allowed_content_types = allowed.clone();
        }
        if let Some(lqip) = self.lqip {
            config.lqip = lqip;
        }
        if let Some(max_dimension) = self.lqip_max_dimension {
            config.lqip_max_dimension = max_dimension;
        }
        if let Some(eager) = &self.eager_variants {
            config.eager_variants = eager.clone();
        }
        if let Some((max_width, max_height)) = self.max_dimensions {
            config.max_width = max_width;
            config.max_height = max_height;
        }
        if let Some(format) = self.canonical_format {
            config.canonical_format = format;
        }
        if let Some(cache_control) = &self.cache_control {
            config.cache_control = Some(cache_control.clone());
        }
    }
}

/// Resolves the merged configuration for an asset path.
#[async_trait]
pub trait PathConfigurationRepository: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<PathConfiguration>;
}

/// In-memory resolver over a fixed set of per-prefix overrides. Lookup walks
/// the path from the root one segment at a time, applying the override
/// registered at each visited prefix; deeper segments win, absent fields
/// inherit.
#[derive(Debug, Clone)]
pub struct StaticPathConfigs {
    root: PathConfiguration,
    overrides: Vec<(String, PathConfigurationOverride)>,
}

impl StaticPathConfigs {
    pub fn new(root: PathConfiguration) -> StaticPathConfigs {
        StaticPathConfigs {
            root,
            overrides: Vec::new(),
        }
    }

    /// Register an override at `prefix` (no leading slash, e.g.
    /// `"products/thumbnails"`). An empty prefix overrides the root.
    pub fn with_override(
        mut self,
        prefix: impl Into<String>,
        config: PathConfigurationOverride,
    ) -> StaticPathConfigs {
        self.overrides.push((prefix.into(), config));
        self
    }

    fn resolve(&self, path: &str) -> PathConfiguration {
        let path = path.trim_matches('/');
        let mut config = self.root.clone();
        let mut prefix = String::new();
        for (at, over) in &self.overrides {
            if at.is_empty() {
                over.apply(&mut config);
            }
        }
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            for (at, over) in &self.overrides {
                if *at == prefix {
                    over.apply(&mut config);
                }
            }
        }
        config
    }
}

#[async_trait]
impl PathConfigurationRepository for StaticPathConfigs {
    async fn fetch(&self, path: &str) -> Result<PathConfiguration> {
        Ok(self.resolve(path))
    }
}
