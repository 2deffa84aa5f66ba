use rand::Rng;
use thiserror::Error;
use tokio::sync::{
    mpsc::{self, error::TryRecvError},
    Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("synchronous-priority weight must be within 1..=100, got {0}")]
    InvalidWeight(u8),
    #[error("job queue is closed")]
    Closed,
}

/// Build the scheduler pair: a clonable [`JobScheduler`] for producers and
/// one [`JobQueue`] that the worker pool drains.
///
/// `queue_size` bounds each lane; a full lane suspends the producer
/// (backpressure). `high_priority_weight` must be within `[1, 100]` and is
/// the percentage of draws that favor the synchronous lane.
pub fn job_channel<T: Send>(
    queue_size: usize,
    high_priority_weight: u8,
) -> Result<(JobScheduler<T>, JobQueue<T>), SchedulerError> {
    if !(1..=100).contains(&high_priority_weight) {
        return Err(SchedulerError::InvalidWeight(high_priority_weight));
    }
    let (high_send, high_recv) = mpsc::channel(queue_size);
    let (background_send, background_recv) = mpsc::channel(queue_size);
    let cancel = CancellationToken::new();
    let scheduler = JobScheduler {
        high: high_send,
        background: background_send,
        cancel: cancel.clone(),
    };
    let queue = JobQueue {
        lanes: Mutex::new(Lanes {
            high: high_recv,
            background: background_recv,
        }),
        high_priority_weight,
        cancel,
    };
    Ok((scheduler, queue))
}

/// Producer half. Knows nothing about job contents; both the pre-process and
/// the generate-variants flows go through the same two lanes.
#[derive(Debug)]
pub struct JobScheduler<T> {
    high: mpsc::Sender<T>,
    background: mpsc::Sender<T>,
    cancel: CancellationToken,
}

// not derived: senders clone without T: Clone
impl<T> Clone for JobScheduler<T> {
    fn clone(&self) -> Self {
        JobScheduler {
            high: self.high.clone(),
            background: self.background.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Send> JobScheduler<T> {
    /// Enqueue a job a caller is blocked waiting on.
    pub async fn schedule_synchronous(&self, job: T) -> Result<(), SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Closed);
        }
        self.high.send(job).await.map_err(|_| SchedulerError::Closed)
    }

    /// Enqueue fire-and-forget work (eager variants, re-encodes).
    pub async fn schedule_background(&self, job: T) -> Result<(), SchedulerError> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Closed);
        }
        self.background
            .send(job)
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    /// Close both lanes: every blocked or future `next()` call returns `None`.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

#[derive(Debug)]
struct Lanes<T> {
    high: mpsc::Receiver<T>,
    background: mpsc::Receiver<T>,
}

/// Consumer half, shared by all workers.
#[derive(Debug)]
pub struct JobQueue<T> {
    lanes: Mutex<Lanes<T>>,
    high_priority_weight: u8,
    cancel: CancellationToken,
}

impl<T: Send> JobQueue<T> {
    /// Dequeue the next job, blocking until one is available. Returns `None`
    /// once the queue is closed (or all producers are gone and both lanes are
    /// drained).
    ///
    /// Dispatch is a biased race, not a strict priority queue: each call
    /// draws `r` in `[0, 100)` and polls the synchronous lane first iff
    /// `r > 100 - weight`, falling back to the other lane when the favored
    /// one is empty. The skew toward the synchronous lane is therefore
    /// statistical, and the background lane can never starve: whenever the
    /// favored lane is empty the other is served immediately.
    pub async fn next(&self) -> Option<T> {
        let mut lanes = self.lanes.lock().await;
        let mut high_closed = false;
        let mut background_closed = false;
        loop {
            if self.cancel.is_cancelled() {
                debug!("job queue closed, signalling cancellation");
                return None;
            }
            let high_first = {
                let r: u32 = rand::thread_rng().gen_range(0..100);
                r > 100 - u32::from(self.high_priority_weight)
            };
            let order = if high_first {
                [true, false]
            } else {
                [false, true]
            };
            for poll_high in order {
                let (lane, closed) = if poll_high {
                    (&mut lanes.high, &mut high_closed)
                } else {
                    (&mut lanes.background, &mut background_closed)
                };
                match lane.try_recv() {
                    Ok(job) => return Some(job),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => *closed = true,
                }
            }
            if high_closed && background_closed {
                return None;
            }

            // Both lanes empty: park until either produces, a lane closes, or
            // the queue is shut down, then re-run the weighted draw.
            let Lanes { high, background } = &mut *lanes;
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                job = high.recv(), if !high_closed => match job {
                    Some(job) => return Some(job),
                    None => high_closed = true,
                },
                job = background.recv(), if !background_closed => match job {
                    Some(job) => return Some(job),
                    None => background_closed = true,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use claims::{assert_err, assert_ok};
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Lane {
        High(u32),
        Background(u32),
    }

    #[test]
    fn weight_outside_range_is_rejected() {
        assert_err!(job_channel::<u32>(8, 0));
        assert_err!(job_channel::<u32>(8, 101));
        assert_ok!(job_channel::<u32>(8, 1));
        assert_ok!(job_channel::<u32>(8, 100));
    }

    #[tokio::test]
    async fn draw_fraction_converges_to_configured_weight() {
        // keep both lanes non-empty for all 20000 draws so the fallback path
        // never distorts the measured bias
        const PER_LANE: usize = 20_000;
        const DRAWS: usize = 20_000;
        for weight in [50u8, 90, 99] {
            let (scheduler, queue) = job_channel(PER_LANE, weight).unwrap();
            for i in 0..PER_LANE as u32 {
                scheduler.schedule_synchronous(Lane::High(i)).await.unwrap();
                scheduler
                    .schedule_background(Lane::Background(i))
                    .await
                    .unwrap();
            }
            let mut from_high = 0usize;
            for _ in 0..DRAWS {
                match queue.next().await.unwrap() {
                    Lane::High(_) => from_high += 1,
                    Lane::Background(_) => {}
                }
            }
            let fraction = from_high as f64 / DRAWS as f64;
            let expected = f64::from(weight) / 100.0;
            assert!(
                (fraction - expected).abs() <= 0.05,
                "weight {weight}: high fraction {fraction} not within 5% of {expected}"
            );
        }
    }

    #[tokio::test]
    async fn every_job_is_dequeued_exactly_once() {
        const PER_LANE: u32 = 500;
        for weight in [50u8, 90, 99] {
            let (scheduler, queue) = job_channel(PER_LANE as usize, weight).unwrap();
            for i in 0..PER_LANE {
                scheduler.schedule_synchronous(Lane::High(i)).await.unwrap();
                scheduler
                    .schedule_background(Lane::Background(i))
                    .await
                    .unwrap();
            }
            drop(scheduler);
            let mut seen = HashSet::new();
            while let Some(job) = queue.next().await {
                assert!(seen.insert(job), "job dequeued twice: {job:?}");
            }
            assert_eq!(seen.len(), 2 * PER_LANE as usize);
        }
    }

    #[tokio::test]
    async fn synchronous_only_load_drains_completely() {
        let (scheduler, queue) = job_channel(300, 80).unwrap();
        for i in 0..300u32 {
            scheduler.schedule_synchronous(i).await.unwrap();
        }
        drop(scheduler);
        let mut count = 0;
        while let Some(_job) = queue.next().await {
            count += 1;
        }
        assert_eq!(count, 300);
    }

    #[tokio::test]
    async fn close_wakes_blocked_consumers() {
        let (scheduler, queue) = job_channel::<u32>(8, 90).unwrap();
        let queue = std::sync::Arc::new(queue);
        let consumer = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        // let the consumer park on the empty lanes first
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.close();
        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("next() still blocked after close")
            .unwrap();
        assert_eq!(result, None);
        // and any later call returns immediately
        assert_eq!(queue.next().await, None);

        assert_err!(scheduler.schedule_synchronous(1).await);
    }
}
