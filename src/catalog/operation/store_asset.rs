use chrono::Utc;
use eyre::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    sync::oneshot,
};
use tracing::{debug, instrument};

use super::{fetch_variant::prewarm_variants, object_key, remove_scratch_files, Services};
use crate::{
    catalog::{rules, transformation::Transformation},
    core::worker::{PreProcessJob, VariantJob},
    model::{NewAsset, PendingAsset, PendingVariant, ReadyAsset},
};

/// Store a fresh upload as a new asset at `new.path`.
///
/// Sequence: validate, stream the payload to the work dir, sniff and check
/// the content type, normalize the original through the worker pool, record
/// the asset with its original variant as Pending, upload the rendered
/// bytes, then flip to Uploaded/Ready. Any failure after the record step
/// leaves the asset Pending and therefore invisible to readers; nothing is
/// marked Uploaded or Ready unless the step before it genuinely succeeded.
///
/// Eager variants configured for the path are scheduled at background
/// priority after the asset is ready; this call does not wait for them.
#[instrument(skip(services, upload, new), fields(path = %new.path))]
pub async fn store_asset(
    services: &Services,
    new: NewAsset,
    mut upload: impl AsyncRead + Send + Unpin,
) -> Result<ReadyAsset> {
    rules::validate_new_asset(&new)?;
    let config = services.path_configs.fetch(&new.path).await?;

    let upload_path = services.work_dir.new_file("upload");
    let destination = services
        .work_dir
        .new_file(config.canonical_format.file_extension());
    // scratch files must not outlive the attempt, whichever way it ends
    let result: Result<ReadyAsset> = async {
        let size = {
            let mut file = tokio::fs::File::create(&upload_path)
                .await
                .wrap_err("could not create upload scratch file")?;
            let size = tokio::io::copy(&mut upload, &mut file)
                .await
                .wrap_err("error streaming upload to disk")?;
            file.flush().await.wrap_err("error flushing upload")?;
            size
        };
        let mime = {
            let mut head = [0u8; 16];
            let mut filled = 0;
            let mut file = tokio::fs::File::open(&upload_path)
                .await
                .wrap_err("could not reopen upload scratch file")?;
            // read() may legally return short; fill up to EOF
            while filled < head.len() {
                let read = file
                    .read(&mut head[filled..])
                    .await
                    .wrap_err("error reading upload head")?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            services.mime_detector.detect(&head[..filled])
        };
        rules::validate_upload(size, mime, &config)?;
        debug!(size, mime, "upload accepted");

        let transformation = rules::pre_process_transformation(&config);
        let (done, completion) = oneshot::channel();
        services
            .scheduler
            .schedule_synchronous(VariantJob::PreProcess(PreProcessJob {
                source: upload_path.clone(),
                transformation,
                destination: destination.clone(),
                lqip: config.lqip,
                lqip_max_dimension: config.lqip_max_dimension,
                done,
            }))
            .await?;
        let processed = completion
            .await
            .wrap_err("worker pool dropped the pre-process job")??;

        let key = object_key(
            &new.path,
            uuid::Uuid::new_v4(),
            processed.attributes.format.file_extension(),
        );
        let original = PendingVariant::create(
            &services.bucket,
            key,
            true,
            Transformation::ORIGINAL_VARIANT,
            processed.attributes,
            processed.lqips,
        );
        let persisted = services
            .repository
            .store_new(PendingAsset {
                new,
                original,
                created_at: Utc::now(),
            })
            .await?;

        let record = persisted.original.record();
        let uploaded_at = services
            .object_store
            .persist(&record.object_store_bucket, &record.object_store_key, &destination)
            .await
            .wrap_err("error uploading original payload, asset left pending")?;
        services
            .repository
            .mark_uploaded(persisted.original.id(), uploaded_at)
            .await?;
        services.repository.mark_ready(persisted.base.id).await.map_err(Into::into)
    }
    .await;
    remove_scratch_files(&[&upload_path, &destination]).await;
    let ready = result?;

    if !config.eager_variants.is_empty() {
        let _warmers = prewarm_variants(services, &ready, &config);
    }
    Ok(ready)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use claims::{assert_err, assert_ok};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        catalog::{
            path_config::{PathConfiguration, StaticPathConfigs},
            transformation::ImageFormat,
        },
        core::{
            scheduler::job_channel,
            storage::LocalFileStorage,
            work_dir::WorkDir,
            worker::VariantGeneratorPool,
        },
        model::{repository::memory::InMemoryAssetRepository, AssetSource},
        processing::{image::mock::MockImageBackend, mime::MagicByteDetector},
    };

    const JPEG_HEAD: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0, 0, 0, 0];

    fn services_with_backend(
        backend: MockImageBackend,
    ) -> (Services, VariantGeneratorPool, tempfile::TempDir) {
        let (scheduler, queue) = job_channel(16, 80).unwrap();
        let pool = VariantGeneratorPool::start(2, Arc::new(queue), Arc::new(backend));
        let store_dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8Path::from_path(store_dir.path())
            .unwrap()
            .to_owned();
        let services = Services {
            repository: Arc::new(InMemoryAssetRepository::new()),
            object_store: Arc::new(LocalFileStorage::new(root)),
            path_configs: Arc::new(StaticPathConfigs::new(PathConfiguration::default())),
            mime_detector: Arc::new(MagicByteDetector),
            scheduler,
            work_dir: Arc::new(WorkDir::new().unwrap()),
            bucket: "assets".to_owned(),
        };
        (services, pool, store_dir)
    }

    fn new_asset(path: &str) -> NewAsset {
        NewAsset {
            path: path.to_owned(),
            alt: None,
            labels: Vec::new(),
            tags: Vec::new(),
            source: AssetSource::Upload,
            source_url: None,
        }
    }

    #[tokio::test]
    async fn stored_asset_becomes_ready_with_uploaded_original() {
        let backend = MockImageBackend::new(400, 300, ImageFormat::Jpeg);
        let (services, pool, _store_dir) = services_with_backend(backend);

        let ready = assert_ok!(
            store_asset(&services, new_asset("products/shoe.jpeg"), JPEG_HEAD).await
        );
        assert_eq!(ready.variant_count(), 1);
        assert!(ready.original.record().is_original_variant);
        let record = ready.original.record();
        assert!(services
            .object_store
            .exists(&record.object_store_bucket, &record.object_store_key)
            .await
            .unwrap());

        // visible through the read path now
        let fetched = services
            .repository
            .fetch_by_path("products/shoe.jpeg")
            .await
            .unwrap();
        assert_eq!(fetched.unwrap().base.id, ready.base.id);

        services.scheduler.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn upload_smaller_than_the_sniff_buffer_is_still_detected() {
        let backend = MockImageBackend::new(400, 300, ImageFormat::Jpeg);
        let (services, pool, _store_dir) = services_with_backend(backend);

        // only the three jpeg magic bytes, shorter than the 16-byte head
        let ready = assert_ok!(
            store_asset(&services, new_asset("products/tiny.jpeg"), &[0xff, 0xd8, 0xff][..])
                .await
        );
        assert_eq!(ready.variant_count(), 1);

        services.scheduler.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn failed_store_leaves_no_scratch_files() {
        let backend = MockImageBackend::new(400, 300, ImageFormat::Jpeg);
        let (services, pool, _store_dir) = services_with_backend(backend);

        assert_err!(store_asset(&services, new_asset("a.txt"), &b"plain text"[..]).await);
        let leftovers = std::fs::read_dir(services.work_dir.path())
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);

        services.scheduler.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn disallowed_content_type_is_rejected_before_any_job_runs() {
        let backend = MockImageBackend::new(400, 300, ImageFormat::Jpeg);
        let (services, pool, _store_dir) = services_with_backend(backend.clone());

        assert_err!(store_asset(&services, new_asset("a.txt"), &b"plain text"[..]).await);
        assert_eq!(backend.open_count(), 0);
        assert!(services
            .repository
            .fetch_by_path("a.txt")
            .await
            .unwrap()
            .is_none());

        services.scheduler.close();
        pool.join().await;
    }
}
