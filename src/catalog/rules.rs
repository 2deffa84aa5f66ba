use thiserror::Error;

use super::{
    path_config::PathConfiguration,
    transformation::{Fit, Transformation},
};
use crate::model::NewAsset;

pub const MAX_ALT_LENGTH: usize = 500;
pub const MAX_LABEL_LENGTH: usize = 100;
pub const MAX_LABELS: usize = 20;
pub const MAX_TAG_LENGTH: usize = 100;
pub const MAX_TAGS: usize = 50;
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_REQUEST_DIMENSION: u32 = 8192;
pub const MAX_BLUR_SIGMA: f32 = 100.0;
pub const MAX_PAD_AMOUNT: u32 = 1024;

/// Rejections surfaced synchronously to the caller, always before any job is
/// scheduled or anything is persisted.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("asset path must not be empty")]
    EmptyPath,
    #[error("alt text exceeds {MAX_ALT_LENGTH} characters")]
    AltTooLong,
    #[error("label '{0}' exceeds {MAX_LABEL_LENGTH} characters")]
    LabelTooLong(String),
    #[error("more than {MAX_LABELS} labels")]
    TooManyLabels,
    #[error("tag '{0}' exceeds {MAX_TAG_LENGTH} characters")]
    TagTooLong(String),
    #[error("more than {MAX_TAGS} tags")]
    TooManyTags,
    #[error("upload of {0} bytes exceeds the {MAX_UPLOAD_BYTES} byte limit")]
    UploadTooLarge(u64),
    #[error("could not detect a supported content type")]
    UnknownContentType,
    #[error("content type '{0}' is not allowed at this path")]
    ContentTypeNotAllowed(String),
    #[error("transformation dimensions must be within 1..={MAX_REQUEST_DIMENSION}")]
    BadDimensions,
    #[error("quality must be within 1..=100, got {0}")]
    BadQuality(u8),
    #[error("blur sigma must be within 0..={MAX_BLUR_SIGMA}, got {0}")]
    BadBlurSigma(f32),
    #[error("pad amount must be at most {MAX_PAD_AMOUNT}, got {0}")]
    BadPadAmount(u32),
}

pub fn validate_new_asset(new: &NewAsset) -> Result<(), ValidationError> {
    if new.path.trim_matches('/').is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if let Some(alt) = &new.alt {
        if alt.chars().count() > MAX_ALT_LENGTH {
            return Err(ValidationError::AltTooLong);
        }
    }
    if new.labels.len() > MAX_LABELS {
        return Err(ValidationError::TooManyLabels);
    }
    if let Some(label) = new
        .labels
        .iter()
        .find(|l| l.chars().count() > MAX_LABEL_LENGTH)
    {
        return Err(ValidationError::LabelTooLong(label.clone()));
    }
    if new.tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags);
    }
    if let Some(tag) = new.tags.iter().find(|t| t.chars().count() > MAX_TAG_LENGTH) {
        return Err(ValidationError::TagTooLong(tag.clone()));
    }
    Ok(())
}

/// Enforce the upload size cap and the per-path content-type policy.
/// `detected_mime` comes from magic-byte sniffing, never from the request.
pub fn validate_upload(
    size: u64,
    detected_mime: Option<&str>,
    config: &PathConfiguration,
) -> Result<(), ValidationError> {
    if size > MAX_UPLOAD_BYTES {
        return Err(ValidationError::UploadTooLarge(size));
    }
    let mime = detected_mime.ok_or(ValidationError::UnknownContentType)?;
    if !config.allows_content_type(mime) {
        return Err(ValidationError::ContentTypeNotAllowed(mime.to_owned()));
    }
    Ok(())
}

/// Reject transformation requests outside serviceable bounds. The original
/// sentinel is exempt from dimension checks since its width/height are
/// placeholders.
pub fn validate_transformation(t: &Transformation) -> Result<(), ValidationError> {
    if !t.original_variant {
        let dimensions_ok = (1..=MAX_REQUEST_DIMENSION).contains(&t.width)
            && (1..=MAX_REQUEST_DIMENSION).contains(&t.height);
        if !dimensions_ok {
            return Err(ValidationError::BadDimensions);
        }
    }
    if !(1..=100).contains(&t.quality) {
        return Err(ValidationError::BadQuality(t.quality));
    }
    if let Some(sigma) = t.blur {
        if !(0.0..=MAX_BLUR_SIGMA).contains(&sigma) {
            return Err(ValidationError::BadBlurSigma(sigma));
        }
    }
    if let Some(pad) = &t.pad {
        if pad.amount > MAX_PAD_AMOUNT {
            return Err(ValidationError::BadPadAmount(pad.amount));
        }
    }
    Ok(())
}

/// Normalization applied to every fresh upload: fit inside the path's
/// maximum dimensions without upscaling and re-encode to the canonical
/// format.
pub fn pre_process_transformation(config: &PathConfiguration) -> Transformation {
    let mut t = Transformation::scale_to(config.max_width, config.max_height, config.canonical_format);
    t.fit = Fit::Contain;
    t.quality = 95;
    t
}

#[cfg(test)]
mod tests {
    use claims::{assert_err_eq, assert_ok};

    use super::*;
    use crate::{
        catalog::transformation::{ImageFormat, Pad, Rgba},
        model::AssetSource,
    };

    fn new_asset() -> NewAsset {
        NewAsset {
            path: "products/shoe.jpeg".to_owned(),
            alt: Some("a shoe".to_owned()),
            labels: vec!["catalog".to_owned()],
            tags: vec!["shoes".to_owned()],
            source: AssetSource::Upload,
            source_url: None,
        }
    }

    #[test]
    fn well_formed_request_passes() {
        assert_ok!(validate_new_asset(&new_asset()));
    }

    #[test]
    fn oversized_metadata_is_rejected() {
        let mut asset = new_asset();
        asset.path = "//".to_owned();
        assert_err_eq!(validate_new_asset(&asset), ValidationError::EmptyPath);

        let mut asset = new_asset();
        asset.alt = Some("x".repeat(MAX_ALT_LENGTH + 1));
        assert_err_eq!(validate_new_asset(&asset), ValidationError::AltTooLong);

        let mut asset = new_asset();
        asset.labels = vec!["l".to_owned(); MAX_LABELS + 1];
        assert_err_eq!(validate_new_asset(&asset), ValidationError::TooManyLabels);

        let mut asset = new_asset();
        asset.tags = vec!["t".repeat(MAX_TAG_LENGTH + 1)];
        assert_err_eq!(
            validate_new_asset(&asset),
            ValidationError::TagTooLong("t".repeat(MAX_TAG_LENGTH + 1))
        );
    }

    #[test]
    fn upload_policy_is_enforced() {
        let config = PathConfiguration::default();
        assert_ok!(validate_upload(1024, Some("image/jpeg"), &config));
        assert_err_eq!(
            validate_upload(MAX_UPLOAD_BYTES + 1, Some("image/jpeg"), &config),
            ValidationError::UploadTooLarge(MAX_UPLOAD_BYTES + 1)
        );
        assert_err_eq!(
            validate_upload(1024, None, &config),
            ValidationError::UnknownContentType
        );
        assert_err_eq!(
            validate_upload(1024, Some("application/pdf"), &config),
            ValidationError::ContentTypeNotAllowed("application/pdf".to_owned())
        );
    }

    #[test]
    fn transformation_bounds_are_enforced() {
        assert_ok!(validate_transformation(&Transformation::scale_to(
            100,
            100,
            ImageFormat::Webp
        )));
        assert_ok!(validate_transformation(&Transformation::ORIGINAL_VARIANT));

        let zero = Transformation::scale_to(0, 100, ImageFormat::Webp);
        assert_err_eq!(validate_transformation(&zero), ValidationError::BadDimensions);

        let mut huge_blur = Transformation::scale_to(100, 100, ImageFormat::Webp);
        huge_blur.blur = Some(500.0);
        assert_err_eq!(
            validate_transformation(&huge_blur),
            ValidationError::BadBlurSigma(500.0)
        );

        let mut wide_pad = Transformation::scale_to(100, 100, ImageFormat::Webp);
        wide_pad.pad = Some(Pad {
            amount: MAX_PAD_AMOUNT + 1,
            color: Rgba {
                r: 0,
                g: 0,
                b: 0,
                a: 255,
            },
        });
        assert_err_eq!(
            validate_transformation(&wide_pad),
            ValidationError::BadPadAmount(MAX_PAD_AMOUNT + 1)
        );
    }

    #[test]
    fn pre_process_conforms_to_path_limits() {
        let config = PathConfiguration {
            max_width: 2048,
            max_height: 1024,
            canonical_format: ImageFormat::Webp,
            ..Default::default()
        };
        let t = pre_process_transformation(&config);
        assert_eq!((t.width, t.height), (2048, 1024));
        assert_eq!(t.fit, Fit::Contain);
        assert_eq!(t.format, ImageFormat::Webp);
        assert!(!t.can_upscale);
        assert!(!t.original_variant);
    }
}
