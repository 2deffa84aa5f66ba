use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Attributes, Lqips, VariantId};
use crate::catalog::{transformation::Transformation, transformation_key::TransformationKey};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VariantStateError {
    #[error("a pending variant must not carry an upload timestamp")]
    PendingWithUploadTimestamp,
    #[error("an uploaded variant requires an upload timestamp")]
    UploadedWithoutTimestamp,
}

/// Row contents shared by both variant states.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub id: VariantId,
    pub object_store_bucket: String,
    pub object_store_key: String,
    pub is_original_variant: bool,
    pub attributes: Attributes,
    pub transformation: Transformation,
    /// Always `transformation.key()`; stored denormalized so lookups never
    /// have to recompute it.
    pub transformation_key: TransformationKey,
    pub lqips: Lqips,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// A variant whose byte payload is not yet confirmed durable in the object
/// store. Never served to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVariant {
    record: VariantRecord,
}

/// A variant whose bytes are durable. The `Pending -> Uploaded` transition
/// happens exactly once and is irreversible.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedVariant {
    record: VariantRecord,
}

impl PendingVariant {
    pub fn try_new(record: VariantRecord) -> Result<PendingVariant, VariantStateError> {
        if record.uploaded_at.is_some() {
            return Err(VariantStateError::PendingWithUploadTimestamp);
        }
        Ok(PendingVariant { record })
    }

    /// Build a fresh pending variant with a newly minted id. The
    /// transformation key is derived here, keeping the key-is-a-pure-function
    /// invariant out of callers' hands.
    pub fn create(
        bucket: impl Into<String>,
        key: impl Into<String>,
        is_original_variant: bool,
        transformation: Transformation,
        attributes: Attributes,
        lqips: Lqips,
    ) -> PendingVariant {
        PendingVariant {
            record: VariantRecord {
                id: VariantId::new(),
                object_store_bucket: bucket.into(),
                object_store_key: key.into(),
                is_original_variant,
                attributes,
                transformation_key: transformation.key(),
                transformation,
                lqips,
                created_at: Utc::now(),
                uploaded_at: None,
            },
        }
    }

    pub fn id(&self) -> VariantId {
        self.record.id
    }

    pub fn record(&self) -> &VariantRecord {
        &self.record
    }

    pub fn into_uploaded(mut self, uploaded_at: DateTime<Utc>) -> UploadedVariant {
        self.record.uploaded_at = Some(uploaded_at);
        UploadedVariant {
            record: self.record,
        }
    }
}

impl UploadedVariant {
    pub fn try_new(record: VariantRecord) -> Result<UploadedVariant, VariantStateError> {
        if record.uploaded_at.is_none() {
            return Err(VariantStateError::UploadedWithoutTimestamp);
        }
        Ok(UploadedVariant { record })
    }

    pub fn id(&self) -> VariantId {
        self.record.id
    }

    pub fn record(&self) -> &VariantRecord {
        &self.record
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.record
            .uploaded_at
            .expect("UploadedVariant construction enforces uploaded_at")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Pending(PendingVariant),
    Uploaded(UploadedVariant),
}

impl Variant {
    pub fn id(&self) -> VariantId {
        match self {
            Variant::Pending(v) => v.id(),
            Variant::Uploaded(v) => v.id(),
        }
    }

    pub fn record(&self) -> &VariantRecord {
        match self {
            Variant::Pending(v) => v.record(),
            Variant::Uploaded(v) => v.record(),
        }
    }

    pub fn transformation_key(&self) -> TransformationKey {
        self.record().transformation_key
    }

    pub fn is_original_variant(&self) -> bool {
        self.record().is_original_variant
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, Variant::Uploaded(_))
    }
}
