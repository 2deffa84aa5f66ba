use std::fmt::Display;

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use super::transformation::{Filter, Fit, Gravity, ImageFormat, Rotation, Transformation};

/// Stable 64-bit cache identity of a [`Transformation`].
///
/// The key is part of the on-disk contract: stored variant rows are looked up
/// by it across deployments, so the canonical field order, the encoding and
/// the hash algorithm below must never change without bumping `KEY_VERSION`
/// (which deliberately invalidates the whole cache namespace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransformationKey(pub u64);

impl Display for TransformationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

const KEY_VERSION: u8 = 1;
const XXH3_SEED: u64 = 0x9d2f_31c6_88ab_507e;

/// Serialize `t` into its canonical byte form and hash it.
///
/// Field order is fixed: width, height, format, fit, gravity, rotate,
/// horizontal_flip, filter, blur, quality, pad amount, pad color (ordered
/// list of four integers, empty when unset). `original_variant` and
/// `can_upscale` are excluded on purpose: they do not change what the
/// produced pixels look like. Pure function, no side effects.
pub fn compute_key(t: &Transformation) -> (Vec<u8>, TransformationKey) {
    let mut w = CanonicalWriter::new();
    w.write_u8(KEY_VERSION);
    w.write_u32(t.width);
    w.write_u32(t.height);
    w.write_u8(format_code(t.format));
    w.write_u8(fit_code(t.fit));
    w.write_u8(gravity_code(t.gravity));
    w.write_u8(rotation_code(t.rotate));
    w.write_bool(t.horizontal_flip);
    w.write_u8(filter_code(t.filter));
    match t.blur {
        Some(sigma) => {
            w.write_u8(1);
            w.write_f32(sigma);
        }
        None => w.write_u8(0),
    }
    w.write_u8(t.quality);
    match t.pad {
        Some(pad) => {
            w.write_u32(pad.amount);
            w.write_u32(4);
            w.write_u32(u32::from(pad.color.r));
            w.write_u32(u32::from(pad.color.g));
            w.write_u32(u32::from(pad.color.b));
            w.write_u32(u32::from(pad.color.a));
        }
        None => {
            w.write_u32(0);
            w.write_u32(0);
        }
    }
    let canonical = w.into_bytes();
    let key = TransformationKey(xxh3_64_with_seed(&canonical, XXH3_SEED));
    (canonical, key)
}

impl Transformation {
    pub fn key(&self) -> TransformationKey {
        compute_key(self).1
    }
}

struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    fn new() -> CanonicalWriter {
        CanonicalWriter {
            buf: Vec::with_capacity(64),
        }
    }

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn format_code(f: ImageFormat) -> u8 {
    match f {
        ImageFormat::Source => 0,
        ImageFormat::Jpeg => 1,
        ImageFormat::Png => 2,
        ImageFormat::Webp => 3,
        ImageFormat::Avif => 4,
        ImageFormat::Gif => 5,
    }
}

fn fit_code(f: Fit) -> u8 {
    match f {
        Fit::Contain => 0,
        Fit::Cover => 1,
        Fit::Fill => 2,
    }
}

fn gravity_code(g: Gravity) -> u8 {
    match g {
        Gravity::Center => 0,
        Gravity::North => 1,
        Gravity::South => 2,
        Gravity::East => 3,
        Gravity::West => 4,
        Gravity::NorthEast => 5,
        Gravity::NorthWest => 6,
        Gravity::SouthEast => 7,
        Gravity::SouthWest => 8,
    }
}

fn rotation_code(r: Rotation) -> u8 {
    match r {
        Rotation::R0 => 0,
        Rotation::R90 => 1,
        Rotation::R180 => 2,
        Rotation::R270 => 3,
    }
}

fn filter_code(f: Filter) -> u8 {
    match f {
        Filter::None => 0,
        Filter::Grayscale => 1,
        Filter::Sepia => 2,
        Filter::Negate => 3,
    }
}
