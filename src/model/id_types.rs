use std::fmt::Display;

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AssetId(pub i64);

/// Monotonic per-path version of an asset. A re-upload to the same path gets
/// a new entry id; readers always see the highest Ready entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntryId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct VariantId(pub Uuid);

impl VariantId {
    /// Mint a fresh id. Ids are never reused, even for variants that end up
    /// merged away by the repository.
    pub fn new() -> VariantId {
        VariantId(Uuid::new_v4())
    }
}

impl Default for VariantId {
    fn default() -> Self {
        VariantId::new()
    }
}

impl From<i64> for AssetId {
    fn from(value: i64) -> Self {
        AssetId(value)
    }
}

impl From<i64> for EntryId {
    fn from(value: i64) -> Self {
        EntryId(value)
    }
}

impl Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("AssetId({})", self.0))
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("EntryId({})", self.0))
    }
}

impl Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("VariantId({})", self.0))
    }
}
