use camino::Utf8Path;
use eyre::Result;

use crate::{
    catalog::transformation::{Filter, Fit, Gravity, ImageFormat, Rgba, Rotation},
    model::Attributes,
};

pub mod mock;
pub mod pipeline;

/// Alpha channel representation a pipeline stage needs its input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaState {
    Premultiplied,
    Unpremultiplied,
}

/// Handle to a decoded image inside the native processing library.
///
/// This is the FFI boundary: all pixel math happens behind it, the engine
/// only sequences operations. Methods mutate the handle in place, mirroring
/// how the underlying library swaps its internal image pointer. Handles are
/// exclusively owned by the job that opened them and are released when
/// dropped, whether the job succeeded or not.
pub trait ImageHandle: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn has_alpha(&self) -> bool;
    fn page_count(&self) -> u32;
    /// Animation loop count, `None` for still images.
    fn loop_count(&self) -> Option<i32>;
    /// Encoding of the file the handle was opened from.
    fn source_format(&self) -> ImageFormat;

    fn premultiply_alpha(&mut self) -> Result<()>;
    fn unpremultiply_alpha(&mut self) -> Result<()>;

    fn resize(
        &mut self,
        width: u32,
        height: u32,
        fit: Fit,
        gravity: Gravity,
        can_upscale: bool,
    ) -> Result<()>;
    fn rotate(&mut self, rotation: Rotation) -> Result<()>;
    fn flip_horizontal(&mut self) -> Result<()>;
    fn apply_filter(&mut self, filter: Filter) -> Result<()>;
    fn gaussian_blur(&mut self, sigma: f32) -> Result<()>;
    fn pad(&mut self, amount: u32, color: Rgba) -> Result<()>;

    /// Encode the current pixels to `out_path`. Returns the encoded size in
    /// bytes. `ImageFormat::Source` re-encodes with the source format.
    fn encode_to(&self, out_path: &Utf8Path, format: ImageFormat, quality: u8) -> Result<u64>;

    fn blurhash(&self) -> Result<String>;
    fn thumbhash(&self) -> Result<String>;
}

/// Entry point into the native image library.
pub trait ImageBackend: Send + Sync {
    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ImageHandle>>;
}

/// Measure the attributes of a handle after transformation, resolving
/// `ImageFormat::Source` to the actual encoding.
pub fn measure(handle: &dyn ImageHandle, requested_format: ImageFormat) -> Attributes {
    let format = match requested_format {
        ImageFormat::Source => handle.source_format(),
        other => other,
    };
    Attributes {
        width: handle.width(),
        height: handle.height(),
        format,
        page_count: (handle.page_count() > 1).then(|| handle.page_count()),
        loop_count: handle.loop_count(),
    }
}
