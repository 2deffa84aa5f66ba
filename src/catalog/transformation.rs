use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

/// How the requested width/height box is applied to the source image.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Fit {
    /// Shrink to fit entirely within the box, keeping aspect ratio.
    Contain,
    /// Fill the box, cropping overflow, keeping aspect ratio.
    Cover,
    /// Stretch to the exact box, ignoring aspect ratio.
    Fill,
}

/// Crop anchor used when `Fit::Cover` has to discard pixels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Gravity {
    Center,
    North,
    South,
    East,
    West,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ImageFormat {
    /// Keep the encoding of the source image.
    Source,
    Jpeg,
    Png,
    Webp,
    Avif,
    Gif,
}

impl ImageFormat {
    pub fn file_extension(&self) -> &'static str {
        match self {
            ImageFormat::Source => "bin",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
            ImageFormat::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            ImageFormat::Source => None,
            ImageFormat::Jpeg => Some("image/jpeg"),
            ImageFormat::Png => Some("image/png"),
            ImageFormat::Webp => Some("image/webp"),
            ImageFormat::Avif => Some("image/avif"),
            ImageFormat::Gif => Some("image/gif"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Filter {
    None,
    Grayscale,
    Sepia,
    Negate,
}

/// Rotation in whole quarter turns, applied clockwise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
pub enum Rotation {
    R0,
    R90,
    R180,
    R270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pad {
    pub amount: u32,
    pub color: Rgba,
}

/// Immutable description of a requested rendition.
///
/// Equality and hashing deliberately ignore `original_variant` and
/// `can_upscale`: cache identity is about what the produced pixels look like,
/// not about how the request characterized upscaling. Two requests that only
/// differ in those fields resolve to the same stored variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Transformation {
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
    pub gravity: Gravity,
    pub can_upscale: bool,
    pub format: ImageFormat,
    pub rotate: Rotation,
    pub horizontal_flip: bool,
    pub filter: Filter,
    /// Gaussian blur sigma. `None` and `Some(0.0)` both mean no blur.
    pub blur: Option<f32>,
    pub quality: u8,
    pub pad: Option<Pad>,
    pub original_variant: bool,
}

impl Transformation {
    /// Sentinel for the unmodified upload. Width/height of 1 are placeholders
    /// and are never used for sizing.
    pub const ORIGINAL_VARIANT: Transformation = Transformation {
        width: 1,
        height: 1,
        fit: Fit::Contain,
        gravity: Gravity::Center,
        can_upscale: false,
        format: ImageFormat::Source,
        rotate: Rotation::R0,
        horizontal_flip: false,
        filter: Filter::None,
        blur: None,
        quality: 100,
        pad: None,
        original_variant: true,
    };

    /// A plain downscale request, everything else left at its neutral value.
    pub fn scale_to(width: u32, height: u32, format: ImageFormat) -> Transformation {
        Transformation {
            width,
            height,
            format,
            ..Transformation::ORIGINAL_VARIANT_BASE
        }
    }

    // Same field values as ORIGINAL_VARIANT but not flagged as original,
    // usable as a `..` base for derived requests.
    const ORIGINAL_VARIANT_BASE: Transformation = Transformation {
        original_variant: false,
        quality: 85,
        ..Transformation::ORIGINAL_VARIANT
    };

    pub fn wants_blur(&self) -> bool {
        self.blur.is_some_and(|sigma| sigma > 0.0)
    }

    pub fn wants_pad(&self) -> bool {
        self.pad.is_some_and(|pad| pad.amount > 0)
    }
}

impl PartialEq for Transformation {
    fn eq(&self, other: &Self) -> bool {
        // original_variant and can_upscale excluded, see type doc
        self.width == other.width
            && self.height == other.height
            && self.fit == other.fit
            && self.gravity == other.gravity
            && self.format == other.format
            && self.rotate == other.rotate
            && self.horizontal_flip == other.horizontal_flip
            && self.filter == other.filter
            && self.blur.map(f32::to_bits) == other.blur.map(f32::to_bits)
            && self.quality == other.quality
            && self.pad == other.pad
    }
}

impl Eq for Transformation {}

impl Hash for Transformation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.width.hash(state);
        self.height.hash(state);
        self.fit.hash(state);
        self.gravity.hash(state);
        self.format.hash(state);
        self.rotate.hash(state);
        self.horizontal_flip.hash(state);
        self.filter.hash(state);
        self.blur.map(f32::to_bits).hash(state);
        self.quality.hash(state);
        self.pad.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn equality_ignores_original_variant_and_can_upscale() {
        let a = Transformation::scale_to(200, 100, ImageFormat::Webp);
        let b = Transformation {
            can_upscale: true,
            original_variant: true,
            ..a
        };
        assert_eq!(a, b);
    }

    #[test]
    fn equality_is_sensitive_to_pixel_affecting_fields() {
        let a = Transformation::scale_to(200, 100, ImageFormat::Webp);
        assert_ne!(
            a,
            Transformation {
                blur: Some(2.5),
                ..a
            }
        );
        assert_ne!(
            a,
            Transformation {
                filter: Filter::Grayscale,
                ..a
            }
        );
        assert_ne!(a, Transformation { width: 201, ..a });
    }
}
