use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    id_types::{AssetId, EntryId},
    variant::{PendingVariant, UploadedVariant, Variant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetSource {
    /// Bytes arrived through the upload endpoint.
    Upload,
    /// Bytes were pulled from an external url (`source_url`).
    External,
}

/// A validated request to create an asset. Exists only in memory; no identity
/// has been assigned yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub path: String,
    pub alt: Option<String>,
    pub labels: Vec<String>,
    pub tags: Vec<String>,
    pub source: AssetSource,
    pub source_url: Option<String>,
}

/// A preprocessed asset waiting for the repository to assign identity and
/// durably record it. The original variant is attached but nothing is
/// persisted anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAsset {
    pub new: NewAsset,
    pub original: PendingVariant,
    pub created_at: DateTime<Utc>,
}

/// Identity and metadata shared by all persisted asset states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBase {
    pub id: AssetId,
    pub path: String,
    pub entry_id: EntryId,
    pub alt: Option<String>,
    pub labels: Vec<String>,
    pub tags: Vec<String>,
    pub source: AssetSource,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Durably recorded, original variant still pending upload. Never returned to
/// readers: fetch operations only ever surface [`ReadyAsset`].
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPersistedAsset {
    pub base: AssetBase,
    pub original: PendingVariant,
}

/// Fully visible asset: the original variant's bytes are confirmed durable.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyAsset {
    pub base: AssetBase,
    pub original: UploadedVariant,
    /// Derived variants in creation order, pending and uploaded alike.
    pub derived: Vec<Variant>,
}

impl ReadyAsset {
    pub fn variant_count(&self) -> usize {
        1 + self.derived.len()
    }
}

/// The full lifecycle as a closed union, useful at boundaries that have to
/// talk about "an asset in whatever state it is in".
#[derive(Debug, Clone, PartialEq)]
pub enum Asset {
    New(NewAsset),
    Pending(PendingAsset),
    PendingPersisted(PendingPersistedAsset),
    Ready(ReadyAsset),
}

impl Asset {
    pub fn path(&self) -> &str {
        match self {
            Asset::New(a) => &a.path,
            Asset::Pending(a) => &a.new.path,
            Asset::PendingPersisted(a) => &a.base.path,
            Asset::Ready(a) => &a.base.path,
        }
    }

    /// States before `Ready` must never be served.
    pub fn is_visible_to_readers(&self) -> bool {
        matches!(self, Asset::Ready(_))
    }
}
