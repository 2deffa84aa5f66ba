use eyre::{bail, eyre, Context, Result};
use tokio::{io::AsyncWriteExt, sync::oneshot, task::JoinHandle};
use tracing::{debug, instrument, warn};

use super::{object_key, remove_scratch_files, Services};
use crate::{
    catalog::{
        path_config::PathConfiguration,
        rules,
        transformation::{ImageFormat, Transformation},
        transformation_key::TransformationKey,
    },
    core::worker::{GenerateVariantsJob, VariantJob, VariantRequest},
    model::{
        repository::RepositoryError, PendingVariant, ReadyAsset, UploadedVariant, Variant,
    },
};

/// What the HTTP layer needs to answer a variant request.
#[derive(Debug, Clone, PartialEq)]
pub struct ServedVariant {
    pub variant: UploadedVariant,
    pub url: String,
    pub cache_control: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    /// A caller is blocked on the result.
    Synchronous,
    /// Eager pre-warming, nobody is waiting.
    Background,
}

/// Serve the variant of the newest asset at `path` described by
/// `transformation`, generating and storing it first if no uploaded variant
/// with the same transformation key exists yet. A cache miss is not an
/// error; it costs one synchronous pipeline run.
#[instrument(skip(services, transformation))]
pub async fn fetch_or_generate_variant(
    services: &Services,
    path: &str,
    transformation: Transformation,
) -> Result<ServedVariant> {
    rules::validate_transformation(&transformation)?;
    let asset = services
        .repository
        .fetch_by_path(path)
        .await?
        .ok_or_else(|| eyre!("no asset at path '{}'", path))?;
    let config = services.path_configs.fetch(path).await?;

    let key = transformation.key();
    if let Some(existing) = lookup_uploaded(services, &asset, key).await? {
        debug!(%key, "serving stored variant");
        return Ok(serve(services, existing, &config));
    }
    debug!(%key, "variant not stored yet, generating");
    let generated =
        generate_and_store(services, &asset, transformation, &config, Priority::Synchronous)
            .await?;
    Ok(serve(services, generated, &config))
}

/// Schedule background generation of every eager variant configured for the
/// asset's path that is not already stored. Returns without waiting; the
/// handles are only joined by tests.
pub fn prewarm_variants(
    services: &Services,
    asset: &ReadyAsset,
    config: &PathConfiguration,
) -> Vec<JoinHandle<()>> {
    config
        .eager_variants
        .iter()
        .map(|&transformation| {
            let services = services.clone();
            let asset = asset.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let key = transformation.key();
                match lookup_uploaded(&services, &asset, key).await {
                    Ok(Some(_)) => return,
                    Ok(None) => {}
                    Err(err) => {
                        warn!(%key, %err, "eager variant lookup failed");
                        return;
                    }
                }
                if let Err(err) = generate_and_store(
                    &services,
                    &asset,
                    transformation,
                    &config,
                    Priority::Background,
                )
                .await
                {
                    warn!(%key, %err, "eager variant generation failed");
                }
            })
        })
        .collect()
}

async fn lookup_uploaded(
    services: &Services,
    asset: &ReadyAsset,
    key: TransformationKey,
) -> Result<Option<UploadedVariant>> {
    if asset.original.record().transformation_key == key {
        return Ok(Some(asset.original.clone()));
    }
    match services
        .repository
        .fetch_variant_by_key(asset.base.id, key)
        .await?
    {
        Some(Variant::Uploaded(variant)) => Ok(Some(variant)),
        // a pending row means another run is mid-upload; treat as a miss and
        // let store_new_variant merge
        Some(Variant::Pending(_)) | None => Ok(None),
    }
}

/// Render the variant through the worker pool, record it, upload its bytes
/// and flip it to Uploaded. Tolerates losing a race against a concurrent run
/// for the same key: the repository merges the rows and whoever uploads
/// first wins the `mark_uploaded` transition.
async fn generate_and_store(
    services: &Services,
    asset: &ReadyAsset,
    transformation: Transformation,
    config: &PathConfiguration,
    priority: Priority,
) -> Result<UploadedVariant> {
    let original = asset.original.record();

    let source = services
        .work_dir
        .new_file(original.attributes.format.file_extension());
    let destination = services.work_dir.new_file(match transformation.format {
        ImageFormat::Source => original.attributes.format.file_extension(),
        other => other.file_extension(),
    });
    // scratch files must not outlive the attempt, whichever way it ends
    let result: Result<UploadedVariant> = async {
        // pull the stored original into the work dir for the pipeline to read
        {
            let mut file = tokio::fs::File::create(&source)
                .await
                .wrap_err("could not create variant source scratch file")?;
            let fetched = services
                .object_store
                .fetch(&original.object_store_bucket, &original.object_store_key, &mut file)
                .await?;
            if !fetched.found {
                bail!(
                    "original payload {}/{} missing from object store",
                    original.object_store_bucket,
                    original.object_store_key
                );
            }
            file.flush().await.wrap_err("error flushing variant source")?;
        }

        let (done, completion) = oneshot::channel();
        let job = VariantJob::GenerateVariants(GenerateVariantsJob {
            source: source.clone(),
            requests: vec![VariantRequest {
                transformation,
                destination: destination.clone(),
                lqip: config.lqip,
                lqip_max_dimension: config.lqip_max_dimension,
                existing_lqips: original.lqips.clone(),
            }],
            done,
        });
        match priority {
            Priority::Synchronous => services.scheduler.schedule_synchronous(job).await?,
            Priority::Background => services.scheduler.schedule_background(job).await?,
        }
        let mut generated = completion
            .await
            .wrap_err("worker pool dropped the variant job")??;
        let generated = generated.remove(0);

        let key = object_key(
            &asset.base.path,
            uuid::Uuid::new_v4(),
            generated.attributes.format.file_extension(),
        );
        let pending = PendingVariant::create(
            &services.bucket,
            key,
            false,
            transformation,
            generated.attributes,
            generated.lqips,
        );
        let stored = services
            .repository
            .store_new_variant(asset.base.id, pending)
            .await?;

        match stored {
            // concurrent run for the same key already finished end to end
            Variant::Uploaded(variant) => Ok(variant),
            Variant::Pending(pending) => {
                let record = pending.record();
                let uploaded_at = services
                    .object_store
                    .persist(
                        &record.object_store_bucket,
                        &record.object_store_key,
                        &generated.destination,
                    )
                    .await
                    .wrap_err("error uploading variant payload, variant left pending")?;
                match services
                    .repository
                    .mark_uploaded(pending.id(), uploaded_at)
                    .await
                {
                    Ok(variant) => Ok(variant),
                    Err(RepositoryError::AlreadyUploaded(_)) => services
                        .repository
                        .fetch_variant_by_key(asset.base.id, pending.record().transformation_key)
                        .await?
                        .and_then(|variant| match variant {
                            Variant::Uploaded(variant) => Some(variant),
                            Variant::Pending(_) => None,
                        })
                        .ok_or_else(|| eyre!("variant vanished after losing upload race")),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }
    .await;
    remove_scratch_files(&[&source, &destination]).await;
    result
}

fn serve(
    services: &Services,
    variant: UploadedVariant,
    config: &PathConfiguration,
) -> ServedVariant {
    let record = variant.record();
    let url = services
        .object_store
        .generate_object_url(&record.object_store_bucket, &record.object_store_key);
    ServedVariant {
        variant,
        url,
        cache_control: config.cache_control.clone(),
    }
}
