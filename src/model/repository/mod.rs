use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AssetBase, AssetId, EntryId, PendingAsset, PendingPersistedAsset, PendingVariant, ReadyAsset,
    UploadedVariant, Variant, VariantId,
};
use crate::catalog::transformation_key::TransformationKey;

mod error;
pub mod memory;

pub use error::RepositoryError;

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Persistence port for the asset/variant lifecycle. Implemented by the
/// relational layer in production and by [`memory::InMemoryAssetRepository`]
/// here.
///
/// Contract highlights:
/// - `store_new` assigns identity (id, per-path entry id) and durably records
///   the asset together with its original variant in `Pending` state.
/// - `mark_uploaded` performs the one-way `Pending -> Uploaded` transition
///   and fails if it was already made.
/// - Fetch operations only surface `Ready` assets; anything earlier in the
///   lifecycle stays invisible to readers.
/// - `store_new_variant` treats `(asset, transformation_key)` as unique:
///   a concurrent duplicate generation run gets the already-stored variant
///   back instead of a second row (idempotent convergence, no locking).
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn store_new(&self, asset: PendingAsset) -> Result<PendingPersistedAsset>;

    async fn mark_uploaded(
        &self,
        variant_id: VariantId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<UploadedVariant>;

    async fn mark_ready(&self, asset_id: AssetId) -> Result<ReadyAsset>;

    async fn store_new_variant(
        &self,
        asset_id: AssetId,
        variant: PendingVariant,
    ) -> Result<Variant>;

    /// The newest Ready asset at `path`, if any.
    async fn fetch_by_path(&self, path: &str) -> Result<Option<ReadyAsset>>;

    /// All Ready entries at `path`, oldest first.
    async fn fetch_all_by_path(&self, path: &str) -> Result<Vec<ReadyAsset>>;

    /// Fetch a specific entry for mutation, regardless of lifecycle state.
    async fn fetch_for_update(&self, path: &str, entry_id: EntryId) -> Result<Option<AssetBase>>;

    async fn update(&self, base: AssetBase) -> Result<()>;

    async fn fetch_variant_by_key(
        &self,
        asset_id: AssetId,
        key: TransformationKey,
    ) -> Result<Option<Variant>>;

    async fn delete_variant(&self, variant_id: VariantId) -> Result<()>;

    /// Delete all derived variants of an asset, keeping the original.
    /// Returns how many were removed.
    async fn delete_derived_variants(&self, asset_id: AssetId) -> Result<usize>;
}
