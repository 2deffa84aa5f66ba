use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AssetRepository, RepositoryError, Result};
use crate::{
    catalog::transformation_key::TransformationKey,
    model::{
        AssetBase, AssetId, EntryId, PendingAsset, PendingPersistedAsset, PendingVariant,
        ReadyAsset, UploadedVariant, Variant, VariantId,
    },
};

/// Reference implementation of [`AssetRepository`] backed by a mutex-guarded
/// vec. Single-process only; exists for tests and for running the engine
/// without a database.
#[derive(Debug, Default)]
pub struct InMemoryAssetRepository {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_asset_id: i64,
    assets: Vec<StoredAsset>,
}

#[derive(Debug)]
struct StoredAsset {
    base: AssetBase,
    ready: bool,
    variants: Vec<Variant>,
}

impl StoredAsset {
    fn original(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_original_variant())
    }

    fn to_ready(&self) -> Result<ReadyAsset> {
        let original = match self.original() {
            Some(Variant::Uploaded(v)) => v.clone(),
            _ => return Err(RepositoryError::OriginalNotUploaded(self.base.id)),
        };
        let derived = self
            .variants
            .iter()
            .filter(|v| !v.is_original_variant())
            .cloned()
            .collect();
        Ok(ReadyAsset {
            base: self.base.clone(),
            original,
            derived,
        })
    }
}

impl InMemoryAssetRepository {
    pub fn new() -> InMemoryAssetRepository {
        Default::default()
    }
}

impl Inner {
    fn asset_mut(&mut self, id: AssetId) -> Result<&mut StoredAsset> {
        self.assets
            .iter_mut()
            .find(|a| a.base.id == id)
            .ok_or(RepositoryError::AssetNotFound(id))
    }
}

#[async_trait]
impl AssetRepository for InMemoryAssetRepository {
    #[tracing::instrument(skip(self, asset), fields(path = %asset.new.path))]
    async fn store_new(&self, asset: PendingAsset) -> Result<PendingPersistedAsset> {
        let mut inner = self.inner.lock().await;
        inner.next_asset_id += 1;
        let id = AssetId(inner.next_asset_id);
        let entry_id = EntryId(
            inner
                .assets
                .iter()
                .filter(|a| a.base.path == asset.new.path)
                .map(|a| a.base.entry_id.0)
                .max()
                .unwrap_or(0)
                + 1,
        );
        let base = AssetBase {
            id,
            path: asset.new.path,
            entry_id,
            alt: asset.new.alt,
            labels: asset.new.labels,
            tags: asset.new.tags,
            source: asset.new.source,
            source_url: asset.new.source_url,
            created_at: asset.created_at,
            modified_at: asset.created_at,
        };
        inner.assets.push(StoredAsset {
            base: base.clone(),
            ready: false,
            variants: vec![Variant::Pending(asset.original.clone())],
        });
        Ok(PendingPersistedAsset {
            base,
            original: asset.original,
        })
    }

    async fn mark_uploaded(
        &self,
        variant_id: VariantId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<UploadedVariant> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .assets
            .iter_mut()
            .flat_map(|a| a.variants.iter_mut())
            .find(|v| v.id() == variant_id)
            .ok_or(RepositoryError::VariantNotFound(variant_id))?;
        match slot {
            Variant::Uploaded(_) => Err(RepositoryError::AlreadyUploaded(variant_id)),
            Variant::Pending(pending) => {
                let uploaded = pending.clone().into_uploaded(uploaded_at);
                *slot = Variant::Uploaded(uploaded.clone());
                Ok(uploaded)
            }
        }
    }

    async fn mark_ready(&self, asset_id: AssetId) -> Result<ReadyAsset> {
        let mut inner = self.inner.lock().await;
        let asset = inner.asset_mut(asset_id)?;
        let ready = asset.to_ready()?;
        asset.ready = true;
        Ok(ready)
    }

    #[tracing::instrument(skip(self, variant), fields(key = %variant.record().transformation_key))]
    async fn store_new_variant(
        &self,
        asset_id: AssetId,
        variant: PendingVariant,
    ) -> Result<Variant> {
        let mut inner = self.inner.lock().await;
        let asset = inner.asset_mut(asset_id)?;
        if variant.record().is_original_variant && asset.original().is_some() {
            return Err(RepositoryError::OriginalVariantConflict(asset_id));
        }
        let key = variant.record().transformation_key;
        if let Some(existing) = asset
            .variants
            .iter()
            .find(|v| !v.is_original_variant() && v.transformation_key() == key)
        {
            // concurrent duplicate generation: merge instead of storing twice
            debug!(%key, existing = %existing.id(), "variant already stored, merging");
            return Ok(existing.clone());
        }
        let stored = Variant::Pending(variant);
        asset.variants.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_by_path(&self, path: &str) -> Result<Option<ReadyAsset>> {
        let inner = self.inner.lock().await;
        inner
            .assets
            .iter()
            .filter(|a| a.ready && a.base.path == path)
            .max_by_key(|a| a.base.entry_id)
            .map(|a| a.to_ready())
            .transpose()
    }

    async fn fetch_all_by_path(&self, path: &str) -> Result<Vec<ReadyAsset>> {
        let inner = self.inner.lock().await;
        inner
            .assets
            .iter()
            .filter(|a| a.ready && a.base.path == path)
            .sorted_by_key(|a| a.base.entry_id)
            .map(|a| a.to_ready())
            .collect()
    }

    async fn fetch_for_update(&self, path: &str, entry_id: EntryId) -> Result<Option<AssetBase>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .assets
            .iter()
            .find(|a| a.base.path == path && a.base.entry_id == entry_id)
            .map(|a| a.base.clone()))
    }

    async fn update(&self, base: AssetBase) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let asset = inner.asset_mut(base.id)?;
        asset.base = base;
        Ok(())
    }

    async fn fetch_variant_by_key(
        &self,
        asset_id: AssetId,
        key: TransformationKey,
    ) -> Result<Option<Variant>> {
        let inner = self.inner.lock().await;
        let asset = inner
            .assets
            .iter()
            .find(|a| a.base.id == asset_id)
            .ok_or(RepositoryError::AssetNotFound(asset_id))?;
        Ok(asset
            .variants
            .iter()
            .find(|v| !v.is_original_variant() && v.transformation_key() == key)
            .cloned())
    }

    async fn delete_variant(&self, variant_id: VariantId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for asset in inner.assets.iter_mut() {
            if let Some(idx) = asset.variants.iter().position(|v| v.id() == variant_id) {
                if asset.variants[idx].is_original_variant() {
                    return Err(RepositoryError::CannotDeleteOriginal(asset.base.id));
                }
                asset.variants.remove(idx);
                return Ok(());
            }
        }
        Err(RepositoryError::VariantNotFound(variant_id))
    }

    async fn delete_derived_variants(&self, asset_id: AssetId) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let asset = inner.asset_mut(asset_id)?;
        let before = asset.variants.len();
        asset.variants.retain(|v| v.is_original_variant());
        Ok(before - asset.variants.len())
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_err, assert_ok, assert_none, assert_some};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        catalog::transformation::{ImageFormat, Transformation},
        model::{AssetSource, Attributes, Lqips, NewAsset},
    };

    fn new_asset(path: &str) -> NewAsset {
        NewAsset {
            path: path.to_owned(),
            alt: None,
            labels: vec!["hero".to_owned()],
            tags: vec![],
            source: AssetSource::Upload,
            source_url: None,
        }
    }

    fn attributes(width: u32, height: u32) -> Attributes {
        Attributes {
            width,
            height,
            format: ImageFormat::Webp,
            page_count: None,
            loop_count: None,
        }
    }

    fn pending_original() -> PendingVariant {
        PendingVariant::create(
            "assets",
            "media/cat/original.webp",
            true,
            Transformation::ORIGINAL_VARIANT,
            attributes(800, 600),
            Lqips::NONE,
        )
    }

    async fn store_ready(repo: &InMemoryAssetRepository, path: &str) -> ReadyAsset {
        let persisted = repo
            .store_new(PendingAsset {
                new: new_asset(path),
                original: pending_original(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        repo.mark_uploaded(persisted.original.id(), Utc::now())
            .await
            .unwrap();
        repo.mark_ready(persisted.base.id).await.unwrap()
    }

    #[tokio::test]
    async fn asset_is_invisible_until_ready() {
        let repo = InMemoryAssetRepository::new();
        let persisted = assert_ok!(
            repo.store_new(PendingAsset {
                new: new_asset("media/cat"),
                original: pending_original(),
                created_at: Utc::now(),
            })
            .await
        );
        assert_none!(assert_ok!(repo.fetch_by_path("media/cat").await));

        // becoming ready requires an uploaded original
        assert_err!(repo.mark_ready(persisted.base.id).await);
        assert_ok!(repo.mark_uploaded(persisted.original.id(), Utc::now()).await);
        let ready = assert_ok!(repo.mark_ready(persisted.base.id).await);
        assert_eq!(ready.base.entry_id, EntryId(1));

        let fetched = assert_some!(assert_ok!(repo.fetch_by_path("media/cat").await));
        assert_eq!(fetched, ready);
    }

    #[tokio::test]
    async fn mark_uploaded_is_one_way() {
        let repo = InMemoryAssetRepository::new();
        let ready = store_ready(&repo, "media/cat").await;
        assert_err!(repo.mark_uploaded(ready.original.id(), Utc::now()).await);
    }

    #[tokio::test]
    async fn newest_entry_shadows_older_ones() {
        let repo = InMemoryAssetRepository::new();
        let first = store_ready(&repo, "media/cat").await;
        let second = store_ready(&repo, "media/cat").await;
        assert_eq!(first.base.entry_id, EntryId(1));
        assert_eq!(second.base.entry_id, EntryId(2));

        let fetched = assert_some!(assert_ok!(repo.fetch_by_path("media/cat").await));
        assert_eq!(fetched.base.id, second.base.id);
        let all = assert_ok!(repo.fetch_all_by_path("media/cat").await);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_variant_key_is_merged() {
        let repo = InMemoryAssetRepository::new();
        let ready = store_ready(&repo, "media/cat").await;
        let transformation = Transformation::scale_to(100, 100, ImageFormat::Webp);
        let make = || {
            PendingVariant::create(
                "assets",
                "media/cat/derived.webp",
                false,
                transformation,
                attributes(100, 75),
                Lqips::NONE,
            )
        };
        let first = assert_ok!(repo.store_new_variant(ready.base.id, make()).await);
        let second = assert_ok!(repo.store_new_variant(ready.base.id, make()).await);
        assert_eq!(first.id(), second.id());
        assert_eq!(
            assert_ok!(repo.fetch_by_path("media/cat").await)
                .unwrap()
                .variant_count(),
            2
        );
        let by_key = assert_some!(assert_ok!(
            repo.fetch_variant_by_key(ready.base.id, transformation.key()).await
        ));
        assert_eq!(by_key.id(), first.id());
    }

    #[tokio::test]
    async fn second_original_variant_is_rejected() {
        let repo = InMemoryAssetRepository::new();
        let ready = store_ready(&repo, "media/cat").await;
        assert_err!(repo.store_new_variant(ready.base.id, pending_original()).await);
    }

    #[tokio::test]
    async fn original_variant_cannot_be_deleted() {
        let repo = InMemoryAssetRepository::new();
        let ready = store_ready(&repo, "media/cat").await;
        assert_err!(repo.delete_variant(ready.original.id()).await);

        let derived = assert_ok!(
            repo.store_new_variant(
                ready.base.id,
                PendingVariant::create(
                    "assets",
                    "media/cat/derived.webp",
                    false,
                    Transformation::scale_to(100, 100, ImageFormat::Webp),
                    attributes(100, 75),
                    Lqips::NONE,
                ),
            )
            .await
        );
        assert_ok!(repo.delete_variant(derived.id()).await);
        assert_eq!(
            assert_ok!(repo.delete_derived_variants(ready.base.id).await),
            0
        );
    }

    #[tokio::test]
    async fn update_changes_metadata() {
        let repo = InMemoryAssetRepository::new();
        let ready = store_ready(&repo, "media/cat").await;
        let mut base = assert_some!(assert_ok!(
            repo.fetch_for_update("media/cat", ready.base.entry_id).await
        ));
        base.alt = Some("a cat".to_owned());
        base.modified_at = Utc::now();
        assert_ok!(repo.update(base.clone()).await);
        let fetched = assert_some!(assert_ok!(repo.fetch_by_path("media/cat").await));
        assert_eq!(fetched.base.alt.as_deref(), Some("a cat"));
    }
}
