use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use camino::Utf8Path;
use eyre::{bail, Result};

use super::{ImageBackend, ImageHandle};
use crate::catalog::transformation::{Filter, Fit, Gravity, ImageFormat, Rgba, Rotation};

/// Deterministic in-memory stand-in for the native image library.
///
/// Tracks geometry through the transformation ops without touching pixels,
/// enforces the alpha-state contract (stages must see the representation they
/// declared), and counts opens/encodes/alpha conversions so tests can assert
/// how much work actually happened.
#[derive(Debug, Clone)]
pub struct MockImageBackend {
    width: u32,
    height: u32,
    alpha: bool,
    format: ImageFormat,
    fail_blur: bool,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    encodes: AtomicUsize,
    premultiplies: AtomicUsize,
    unpremultiplies: AtomicUsize,
}

impl MockImageBackend {
    pub fn new(width: u32, height: u32, format: ImageFormat) -> MockImageBackend {
        MockImageBackend {
            width,
            height,
            alpha: false,
            format,
            fail_blur: false,
            counters: Default::default(),
        }
    }

    pub fn with_alpha(mut self) -> MockImageBackend {
        self.alpha = true;
        self
    }

    /// Make every `gaussian_blur` call fail, for fail-fast pipeline tests.
    pub fn failing_on_blur(mut self) -> MockImageBackend {
        self.fail_blur = true;
        self
    }

    pub fn open_mock(&self) -> MockImage {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        MockImage {
            width: self.width,
            height: self.height,
            alpha: self.alpha,
            premultiplied: false,
            format: self.format,
            fail_blur: self.fail_blur,
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn open_count(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn encode_count(&self) -> usize {
        self.counters.encodes.load(Ordering::SeqCst)
    }

    pub fn premultiply_count(&self) -> usize {
        self.counters.premultiplies.load(Ordering::SeqCst)
    }

    pub fn unpremultiply_count(&self) -> usize {
        self.counters.unpremultiplies.load(Ordering::SeqCst)
    }
}

impl ImageBackend for MockImageBackend {
    fn open(&self, _path: &Utf8Path) -> Result<Box<dyn ImageHandle>> {
        Ok(Box::new(self.open_mock()))
    }
}

#[derive(Debug)]
pub struct MockImage {
    width: u32,
    height: u32,
    alpha: bool,
    premultiplied: bool,
    format: ImageFormat,
    fail_blur: bool,
    counters: Arc<Counters>,
}

impl MockImage {
    pub fn premultiplied(&self) -> bool {
        self.premultiplied
    }

    fn expect_alpha_state(&self, premultiplied: bool, op: &str) -> Result<()> {
        if self.alpha && self.premultiplied != premultiplied {
            bail!(
                "mock backend: {op} called with {} alpha",
                if self.premultiplied {
                    "premultiplied"
                } else {
                    "straight"
                }
            );
        }
        Ok(())
    }
}

impl ImageHandle for MockImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn has_alpha(&self) -> bool {
        self.alpha
    }

    fn page_count(&self) -> u32 {
        1
    }

    fn loop_count(&self) -> Option<i32> {
        None
    }

    fn source_format(&self) -> ImageFormat {
        self.format
    }

    fn premultiply_alpha(&mut self) -> Result<()> {
        if self.premultiplied {
            bail!("mock backend: redundant premultiply");
        }
        self.premultiplied = true;
        self.counters.premultiplies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unpremultiply_alpha(&mut self) -> Result<()> {
        if !self.premultiplied {
            bail!("mock backend: redundant unpremultiply");
        }
        self.premultiplied = false;
        self.counters.unpremultiplies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resize(
        &mut self,
        width: u32,
        height: u32,
        fit: Fit,
        _gravity: Gravity,
        can_upscale: bool,
    ) -> Result<()> {
        self.expect_alpha_state(true, "resize")?;
        let (w, h) = (self.width as f64, self.height as f64);
        let (tw, th) = (f64::from(width.max(1)), f64::from(height.max(1)));
        match fit {
            Fit::Fill => {
                self.width = width.max(1);
                self.height = height.max(1);
            }
            Fit::Contain => {
                let mut scale = (tw / w).min(th / h);
                if !can_upscale {
                    scale = scale.min(1.0);
                }
                self.width = (w * scale).round().max(1.0) as u32;
                self.height = (h * scale).round().max(1.0) as u32;
            }
            Fit::Cover => {
                let mut scale = (tw / w).max(th / h);
                if !can_upscale {
                    scale = scale.min(1.0);
                }
                // scaled then center-cropped to the box
                self.width = ((w * scale).round().max(1.0) as u32).min(width.max(1));
                self.height = ((h * scale).round().max(1.0) as u32).min(height.max(1));
            }
        }
        Ok(())
    }

    fn rotate(&mut self, rotation: Rotation) -> Result<()> {
        self.expect_alpha_state(false, "rotate")?;
        if matches!(rotation, Rotation::R90 | Rotation::R270) {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        Ok(())
    }

    fn flip_horizontal(&mut self) -> Result<()> {
        self.expect_alpha_state(false, "flip_horizontal")?;
        Ok(())
    }

    fn apply_filter(&mut self, _filter: Filter) -> Result<()> {
        self.expect_alpha_state(false, "apply_filter")?;
        Ok(())
    }

    fn gaussian_blur(&mut self, _sigma: f32) -> Result<()> {
        if self.fail_blur {
            bail!("mock backend: blur failure injected");
        }
        self.expect_alpha_state(true, "gaussian_blur")?;
        Ok(())
    }

    fn pad(&mut self, amount: u32, _color: Rgba) -> Result<()> {
        self.expect_alpha_state(false, "pad")?;
        self.width += 2 * amount;
        self.height += 2 * amount;
        Ok(())
    }

    fn encode_to(&self, out_path: &Utf8Path, format: ImageFormat, quality: u8) -> Result<u64> {
        let format = match format {
            ImageFormat::Source => self.format,
            other => other,
        };
        let payload = format!(
            "mockimg:{}:{}x{}:q{}",
            format, self.width, self.height, quality
        );
        std::fs::write(out_path, &payload)?;
        self.counters.encodes.fetch_add(1, Ordering::SeqCst);
        Ok(payload.len() as u64)
    }

    fn blurhash(&self) -> Result<String> {
        Ok(format!("blurhash:{}x{}", self.width, self.height))
    }

    fn thumbhash(&self) -> Result<String> {
        Ok(format!("thumbhash:{}x{}", self.width, self.height))
    }
}
