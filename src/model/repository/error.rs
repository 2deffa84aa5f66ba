use thiserror::Error;

use super::super::{AssetId, VariantId};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("no asset with id {0}")]
    AssetNotFound(AssetId),
    #[error("no variant with id {0}")]
    VariantNotFound(VariantId),
    #[error("variant {0} is already uploaded")]
    AlreadyUploaded(VariantId),
    #[error("asset {0} already has an original variant")]
    OriginalVariantConflict(AssetId),
    #[error("asset {0} cannot become ready, its original variant is not uploaded")]
    OriginalNotUploaded(AssetId),
    #[error("the original variant of asset {0} cannot be deleted")]
    CannotDeleteOriginal(AssetId),
    #[error("{0}")]
    Other(String),
}
