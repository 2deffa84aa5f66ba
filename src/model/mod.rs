mod asset;
mod attributes;
mod id_types;
pub mod repository;
mod variant;

pub use asset::{Asset, AssetBase, AssetSource, NewAsset, PendingAsset, PendingPersistedAsset, ReadyAsset};
pub use attributes::{Attributes, Lqips};
pub use id_types::{AssetId, EntryId, VariantId};
pub use variant::{PendingVariant, UploadedVariant, Variant, VariantRecord, VariantStateError};
