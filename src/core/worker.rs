use std::{panic::AssertUnwindSafe, sync::Arc};

use camino::Utf8PathBuf;
use eyre::{eyre, Result};
use futures::FutureExt;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    catalog::{path_config::LqipModes, transformation::Transformation},
    core::scheduler::JobQueue,
    model::{Attributes, Lqips},
    processing::image::{measure, pipeline, ImageBackend, ImageHandle},
};

/// Everything the pool knows how to execute. Closed set, matched
/// exhaustively in the worker loop.
pub enum VariantJob {
    PreProcess(PreProcessJob),
    GenerateVariants(GenerateVariantsJob),
}

impl VariantJob {
    fn kind(&self) -> &'static str {
        match self {
            VariantJob::PreProcess(_) => "pre-process",
            VariantJob::GenerateVariants(_) => "generate-variants",
        }
    }
}

/// Normalize a fresh upload (conform to max dimensions, canonical encode)
/// and learn its attributes and placeholders before anything is persisted.
pub struct PreProcessJob {
    pub source: Utf8PathBuf,
    pub transformation: Transformation,
    pub destination: Utf8PathBuf,
    pub lqip: LqipModes,
    /// Renders whose longest side exceeds this get no placeholders.
    pub lqip_max_dimension: u32,
    pub done: oneshot::Sender<Result<PreProcessedImage>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreProcessedImage {
    pub attributes: Attributes,
    pub lqips: Lqips,
    pub file_size: u64,
}

/// Render one or more derived variants from an already-stored source file.
/// Each request gets its own pipeline run on a freshly opened handle, no
/// image state is shared between items.
pub struct GenerateVariantsJob {
    pub source: Utf8PathBuf,
    pub requests: Vec<VariantRequest>,
    pub done: oneshot::Sender<Result<Vec<GeneratedVariant>>>,
}

#[derive(Debug, Clone)]
pub struct VariantRequest {
    pub transformation: Transformation,
    pub destination: Utf8PathBuf,
    pub lqip: LqipModes,
    pub lqip_max_dimension: u32,
    /// Placeholders already stored for this asset. Reused as-is when the
    /// pipeline reports the rendered pixels still match them.
    pub existing_lqips: Lqips,
}

#[derive(Debug, Clone)]
pub struct GeneratedVariant {
    pub transformation: Transformation,
    pub destination: Utf8PathBuf,
    pub attributes: Attributes,
    pub lqips: Lqips,
    pub file_size: u64,
}

/// Fixed-size pool of consumer loops draining the shared [`JobQueue`]. The
/// worker count bounds concurrent pipeline runs in the native image library,
/// independently of how many callers are blocked on completion futures.
pub struct VariantGeneratorPool {
    workers: Vec<JoinHandle<()>>,
}

impl VariantGeneratorPool {
    pub fn start(
        worker_count: usize,
        queue: Arc<JobQueue<VariantJob>>,
        backend: Arc<dyn ImageBackend>,
    ) -> VariantGeneratorPool {
        info!(worker_count, "starting variant generator pool");
        let workers = (0..worker_count)
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let backend = Arc::clone(&backend);
                tokio::spawn(run_worker(worker_id, queue, backend))
            })
            .collect();
        VariantGeneratorPool { workers }
    }

    /// Wait for all workers to exit. Returns once the scheduler is closed
    /// and every in-flight job has been resolved.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(%err, "worker task did not shut down cleanly");
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<JobQueue<VariantJob>>,
    backend: Arc<dyn ImageBackend>,
) {
    while let Some(job) = queue.next().await {
        debug!(worker_id, kind = job.kind(), "worker picked up job");
        // A fault in one job resolves that job's future as failed and
        // nothing else. The loop must survive every job, panics included.
        match job {
            VariantJob::PreProcess(job) => {
                let PreProcessJob {
                    source,
                    transformation,
                    destination,
                    lqip,
                    lqip_max_dimension,
                    done,
                } = job;
                let request = VariantRequest {
                    transformation,
                    destination,
                    lqip,
                    lqip_max_dimension,
                    existing_lqips: Lqips::NONE,
                };
                let result = execute_requests(Arc::clone(&backend), source, vec![request])
                    .await
                    .map(|mut generated| {
                        let generated = generated.remove(0);
                        PreProcessedImage {
                            attributes: generated.attributes,
                            lqips: generated.lqips,
                            file_size: generated.file_size,
                        }
                    });
                if let Err(ref err) = result {
                    warn!(worker_id, %err, "pre-process job failed");
                }
                if done.send(result).is_err() {
                    debug!(worker_id, "pre-process caller went away before completion");
                }
            }
            VariantJob::GenerateVariants(job) => {
                let GenerateVariantsJob {
                    source,
                    requests,
                    done,
                } = job;
                let result = execute_requests(Arc::clone(&backend), source, requests).await;
                if let Err(ref err) = result {
                    warn!(worker_id, %err, "generate-variants job failed");
                }
                if done.send(result).is_err() {
                    debug!(worker_id, "variant caller went away before completion");
                }
            }
        }
    }
    debug!(worker_id, "job queue closed, worker exiting");
}

/// Run the pipeline once per request on its own handle and encode each
/// result to its destination. Pipeline and encode are CPU-bound native
/// calls, so the whole batch runs on the blocking pool; a panic anywhere in
/// it is caught here and surfaced as a failed result.
#[instrument(skip(backend, requests), fields(requests = requests.len()))]
async fn execute_requests(
    backend: Arc<dyn ImageBackend>,
    source: Utf8PathBuf,
    requests: Vec<VariantRequest>,
) -> Result<Vec<GeneratedVariant>> {
    let work = tokio::task::spawn_blocking(move || -> Result<Vec<GeneratedVariant>> {
        let mut generated = Vec::with_capacity(requests.len());
        for request in requests {
            let mut image = backend.open(&source)?;
            let result = pipeline::run(image.as_mut(), &request.transformation);
            if !result.successful {
                return Err(eyre!(
                    "pipeline failed: {}",
                    result
                        .failure_message()
                        .unwrap_or("no failing stage recorded")
                ));
            }
            let attributes = measure(image.as_ref(), request.transformation.format);
            let file_size = image.encode_to(
                &request.destination,
                request.transformation.format,
                request.transformation.quality,
            )?;
            let lqips = compute_lqips(
                image.as_ref(),
                request.lqip,
                request.lqip_max_dimension,
                &request.existing_lqips,
                result.requires_lqip_regeneration,
            )?;
            generated.push(GeneratedVariant {
                transformation: request.transformation,
                destination: request.destination,
                attributes,
                lqips,
                file_size,
            });
        }
        Ok(generated)
    });
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => {
            Err(eyre!("variant job panicked: {:?}", join_err))
        }
        Ok(Err(join_err)) => Err(eyre!("variant job was cancelled: {:?}", join_err)),
        Err(_panic) => Err(eyre!("variant job dispatch panicked")),
    }
}

fn compute_lqips(
    image: &dyn ImageHandle,
    modes: LqipModes,
    max_dimension: u32,
    existing: &Lqips,
    requires_regeneration: bool,
) -> Result<Lqips> {
    if !modes.any() {
        return Ok(Lqips::NONE);
    }
    // Hashing an image far bigger than any preview is wasted work; paths
    // that want placeholders for large renders raise the threshold.
    if image.width().max(image.height()) > max_dimension {
        return Ok(Lqips::NONE);
    }
    // Geometry-only renders keep matching a previously computed placeholder.
    if !requires_regeneration && !existing.is_empty() {
        return Ok(existing.clone());
    }
    Ok(Lqips {
        blurhash: modes.blurhash.then(|| image.blurhash()).transpose()?,
        thumbhash: modes.thumbhash.then(|| image.thumbhash()).transpose()?,
    })
}
