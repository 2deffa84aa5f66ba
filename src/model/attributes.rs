use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::transformation::ImageFormat;

/// Measured properties of a produced variant. Always derived from the
/// rendered output, never supplied by the caller, and stored as a JSON
/// artifact next to the variant row. Attributes do not participate in the
/// transformation key: they describe what the variant physically is, not the
/// requested intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Animation loop count, only present for animated formats.
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<i32>,
}

impl Attributes {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).wrap_err("error serializing variant attributes")
    }
}

/// Low-quality image placeholders, produced only when the owning path
/// configuration enables them and the source is small enough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lqips {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blurhash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbhash: Option<String>,
}

impl Lqips {
    pub const NONE: Lqips = Lqips {
        blurhash: None,
        thumbhash: None,
    };

    pub fn is_empty(&self) -> bool {
        self.blurhash.is_none() && self.thumbhash.is_none()
    }
}
