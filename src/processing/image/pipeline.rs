use tracing::debug;

use super::{AlphaState, ImageHandle};
use crate::catalog::transformation::{Filter, Rotation, Transformation};

/// Outcome of one stage that the pipeline decided to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub stage: &'static str,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Applied,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub successful: bool,
    /// True if any applied stage changed the rendered pixels in a way that
    /// invalidates a previously computed LQIP. A pure geometric resize does
    /// not set this on its own.
    pub requires_lqip_regeneration: bool,
    pub applied_steps: Vec<StepOutcome>,
}

impl PipelineResult {
    pub fn failure_message(&self) -> Option<&str> {
        self.applied_steps.iter().find_map(|step| match &step.status {
            StepStatus::Failed { message } => Some(message.as_str()),
            StepStatus::Applied => None,
        })
    }
}

trait TransformStage: Sync {
    fn name(&self) -> &'static str;
    /// Cheap skip check: does this transformation have any effect at this
    /// stage for this source image?
    fn requires_transformation(&self, image: &dyn ImageHandle, t: &Transformation) -> bool;
    fn required_alpha_state(&self) -> AlphaState;
    fn invalidates_lqip(&self) -> bool;
    fn transform(&self, image: &mut dyn ImageHandle, t: &Transformation) -> eyre::Result<()>;
}

struct ResizeStage;
struct RotateFlipStage;
struct ColorFilterStage;
struct GaussianBlurStage;
struct PadStage;

// Order is significant: blur must see filtered colors, padding must come last
// so the pad color is not affected by earlier stages.
static STAGES: [&(dyn TransformStage); 5] = [
    &ResizeStage,
    &RotateFlipStage,
    &ColorFilterStage,
    &GaussianBlurStage,
    &PadStage,
];

impl TransformStage for ResizeStage {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn requires_transformation(&self, image: &dyn ImageHandle, t: &Transformation) -> bool {
        if t.original_variant {
            return false;
        }
        if t.width == image.width() && t.height == image.height() {
            return false;
        }
        // a source that already fits inside the box is left alone unless
        // upscaling was requested
        if !t.can_upscale
            && matches!(t.fit, crate::catalog::transformation::Fit::Contain)
            && image.width() <= t.width
            && image.height() <= t.height
        {
            return false;
        }
        true
    }

    fn required_alpha_state(&self) -> AlphaState {
        AlphaState::Premultiplied
    }

    fn invalidates_lqip(&self) -> bool {
        false
    }

    fn transform(&self, image: &mut dyn ImageHandle, t: &Transformation) -> eyre::Result<()> {
        image.resize(t.width, t.height, t.fit, t.gravity, t.can_upscale)
    }
}

impl TransformStage for RotateFlipStage {
    fn name(&self) -> &'static str {
        "rotate-flip"
    }

    fn requires_transformation(&self, _image: &dyn ImageHandle, t: &Transformation) -> bool {
        t.rotate != Rotation::R0 || t.horizontal_flip
    }

    fn required_alpha_state(&self) -> AlphaState {
        AlphaState::Unpremultiplied
    }

    fn invalidates_lqip(&self) -> bool {
        true
    }

    fn transform(&self, image: &mut dyn ImageHandle, t: &Transformation) -> eyre::Result<()> {
        if t.rotate != Rotation::R0 {
            image.rotate(t.rotate)?;
        }
        if t.horizontal_flip {
            image.flip_horizontal()?;
        }
        Ok(())
    }
}

impl TransformStage for ColorFilterStage {
    fn name(&self) -> &'static str {
        "color-filter"
    }

    fn requires_transformation(&self, _image: &dyn ImageHandle, t: &Transformation) -> bool {
        t.filter != Filter::None
    }

    fn required_alpha_state(&self) -> AlphaState {
        AlphaState::Unpremultiplied
    }

    fn invalidates_lqip(&self) -> bool {
        true
    }

    fn transform(&self, image: &mut dyn ImageHandle, t: &Transformation) -> eyre::Result<()> {
        image.apply_filter(t.filter)
    }
}

impl TransformStage for GaussianBlurStage {
    fn name(&self) -> &'static str {
        "gaussian-blur"
    }

    fn requires_transformation(&self, _image: &dyn ImageHandle, t: &Transformation) -> bool {
        t.wants_blur()
    }

    fn required_alpha_state(&self) -> AlphaState {
        AlphaState::Premultiplied
    }

    fn invalidates_lqip(&self) -> bool {
        true
    }

    fn transform(&self, image: &mut dyn ImageHandle, t: &Transformation) -> eyre::Result<()> {
        let sigma = t.blur.expect("requires_transformation checked wants_blur");
        image.gaussian_blur(sigma)
    }
}

impl TransformStage for PadStage {
    fn name(&self) -> &'static str {
        "pad"
    }

    fn requires_transformation(&self, _image: &dyn ImageHandle, t: &Transformation) -> bool {
        t.wants_pad()
    }

    fn required_alpha_state(&self) -> AlphaState {
        AlphaState::Unpremultiplied
    }

    fn invalidates_lqip(&self) -> bool {
        true
    }

    fn transform(&self, image: &mut dyn ImageHandle, t: &Transformation) -> eyre::Result<()> {
        let pad = t.pad.expect("requires_transformation checked wants_pad");
        image.pad(pad.amount, pad.color)
    }
}

/// Run the fixed transformation pipeline over `image`.
///
/// Stages that have no effect for `t` are skipped without touching the image.
/// The alpha channel is converted lazily to whatever the next applied stage
/// requires, tracked in a single flag so back-to-back stages with the same
/// requirement cost nothing; the image is always handed back un-premultiplied.
/// The first failing stage aborts the run (fail-fast) and is recorded in the
/// audit trail; the caller decides whether that kills the job.
pub fn run(image: &mut dyn ImageHandle, t: &Transformation) -> PipelineResult {
    let mut applied_steps = Vec::new();
    let mut requires_lqip_regeneration = false;
    let mut premultiplied = false;
    let mut successful = true;

    for stage in STAGES {
        if !stage.requires_transformation(image, t) {
            continue;
        }
        if let Err(err) = match_alpha_state(image, stage.required_alpha_state(), &mut premultiplied)
        {
            applied_steps.push(StepOutcome {
                stage: stage.name(),
                status: StepStatus::Failed {
                    message: format!("alpha conversion failed: {err:#}"),
                },
            });
            successful = false;
            break;
        }
        match stage.transform(image, t) {
            Ok(()) => {
                debug!(stage = stage.name(), "applied transformation stage");
                applied_steps.push(StepOutcome {
                    stage: stage.name(),
                    status: StepStatus::Applied,
                });
                if stage.invalidates_lqip() {
                    requires_lqip_regeneration = true;
                }
            }
            Err(err) => {
                applied_steps.push(StepOutcome {
                    stage: stage.name(),
                    status: StepStatus::Failed {
                        message: format!("{err:#}"),
                    },
                });
                successful = false;
                break;
            }
        }
    }

    if premultiplied {
        if let Err(err) = image.unpremultiply_alpha() {
            tracing::warn!("could not un-premultiply pipeline output: {err:#}");
            successful = false;
        }
    }

    PipelineResult {
        successful,
        requires_lqip_regeneration,
        applied_steps,
    }
}

fn match_alpha_state(
    image: &mut dyn ImageHandle,
    required: AlphaState,
    premultiplied: &mut bool,
) -> eyre::Result<()> {
    if !image.has_alpha() {
        return Ok(());
    }
    match (required, *premultiplied) {
        (AlphaState::Premultiplied, false) => {
            image.premultiply_alpha()?;
            *premultiplied = true;
        }
        (AlphaState::Unpremultiplied, true) => {
            image.unpremultiply_alpha()?;
            *premultiplied = false;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        catalog::transformation::{Filter, Fit, ImageFormat, Pad, Rgba, Rotation, Transformation},
        processing::image::mock::MockImageBackend,
    };

    fn backend() -> MockImageBackend {
        MockImageBackend::new(400, 300, ImageFormat::Png).with_alpha()
    }

    #[test]
    fn stages_with_no_effect_are_skipped() {
        let backend = backend();
        let mut image = backend.open_mock();
        let result = run(
            &mut image,
            &Transformation::scale_to(100, 100, ImageFormat::Webp),
        );
        assert!(result.successful);
        let stages: Vec<_> = result.applied_steps.iter().map(|s| s.stage).collect();
        assert_eq!(stages, ["resize"]);
        assert!(!result.requires_lqip_regeneration);
        assert_eq!((image.width(), image.height()), (100, 75));
    }

    #[test]
    fn original_variant_is_a_no_op() {
        let backend = backend();
        let mut image = backend.open_mock();
        let result = run(&mut image, &Transformation::ORIGINAL_VARIANT);
        assert!(result.successful);
        assert_eq!(result.applied_steps, []);
        assert_eq!((image.width(), image.height()), (400, 300));
    }

    #[test]
    fn contain_without_upscale_skips_smaller_sources() {
        let backend = backend();
        let mut image = backend.open_mock();
        let t = Transformation::scale_to(800, 800, ImageFormat::Webp);
        let result = run(&mut image, &t);
        assert!(result.successful);
        assert_eq!(result.applied_steps, []);

        let mut image = backend.open_mock();
        let upscaled = run(
            &mut image,
            &Transformation {
                can_upscale: true,
                ..t
            },
        );
        assert_eq!(upscaled.applied_steps.len(), 1);
        assert_eq!((image.width(), image.height()), (800, 600));
    }

    #[test]
    fn full_pipeline_runs_in_fixed_order() {
        let backend = backend();
        let mut image = backend.open_mock();
        let t = Transformation {
            rotate: Rotation::R90,
            horizontal_flip: true,
            filter: Filter::Grayscale,
            blur: Some(2.0),
            pad: Some(Pad {
                amount: 8,
                color: Rgba {
                    r: 0,
                    g: 0,
                    b: 0,
                    a: 255,
                },
            }),
            fit: Fit::Cover,
            ..Transformation::scale_to(100, 100, ImageFormat::Webp)
        };
        let result = run(&mut image, &t);
        assert!(result.successful);
        let stages: Vec<_> = result.applied_steps.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            ["resize", "rotate-flip", "color-filter", "gaussian-blur", "pad"]
        );
        assert!(result.requires_lqip_regeneration);
        // output is always handed back un-premultiplied
        assert!(!image.premultiplied());
        // resize requires premultiplied, rotate/filter straight alpha, blur
        // premultiplied again, pad straight again: 2 conversions each way
        // plus none wasted
        assert_eq!(backend.premultiply_count(), 2);
        assert_eq!(backend.unpremultiply_count(), 2);
    }

    #[test]
    fn failing_stage_aborts_the_rest() {
        let backend = backend().failing_on_blur();
        let mut image = backend.open_mock();
        let t = Transformation {
            filter: Filter::Sepia,
            blur: Some(3.0),
            pad: Some(Pad {
                amount: 2,
                color: Rgba {
                    r: 255,
                    g: 255,
                    b: 255,
                    a: 255,
                },
            }),
            ..Transformation::scale_to(100, 100, ImageFormat::Webp)
        };
        let result = run(&mut image, &t);
        assert!(!result.successful);
        let stages: Vec<_> = result.applied_steps.iter().map(|s| s.stage).collect();
        // pad is never reached
        assert_eq!(stages, ["resize", "color-filter", "gaussian-blur"]);
        assert_eq!(
            result.applied_steps.last().unwrap().status,
            StepStatus::Failed {
                message: "mock backend: blur failure injected".to_owned()
            }
        );
        assert!(result.failure_message().is_some());
    }

    #[test]
    fn repeated_runs_apply_the_same_stages() {
        let t = Transformation {
            filter: Filter::Grayscale,
            blur: Some(1.0),
            ..Transformation::scale_to(128, 128, ImageFormat::Avif)
        };
        let backend = backend();
        let mut first_image = backend.open_mock();
        let first = run(&mut first_image, &t);
        let mut second_image = backend.open_mock();
        let second = run(&mut second_image, &t);
        assert_eq!(first.successful, second.successful);
        let names = |r: &PipelineResult| {
            r.applied_steps.iter().map(|s| s.stage).collect::<Vec<_>>()
        };
        assert_eq!(names(&first), names(&second));
    }
}
