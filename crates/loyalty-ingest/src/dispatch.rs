//! Bounded-concurrency upload dispatch
//!
//! A fixed pool of workers pulls [`UploadTask`]s from a shared channel and
//! hands each one to the [`Sink`] exactly once. A semaphore caps the number
//! of submitted-but-unfinished tasks: each task carries its permit into the
//! worker, and the permit is released only after the sink call returns.
//!
//! The first failed upload is recorded and cancels the dispatcher's token.
//! Uploads already handed to workers still run to completion, but `submit`
//! refuses new work from then on and `drain` reports the failure.

use crate::error::{IngestError, Result};
use crate::sink::Sink;
use loyalty_common::UploadTask;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

type Job = (UploadTask, OwnedSemaphorePermit);

/// The first upload that failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("batch {sequence}: {message}")]
pub struct UploadFailure {
    pub sequence: u64,
    pub message: String,
}

impl From<UploadFailure> for IngestError {
    fn from(failure: UploadFailure) -> Self {
        IngestError::Upload {
            sequence: failure.sequence,
            message: failure.message,
        }
    }
}

/// Totals over every acknowledged upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches_uploaded: u64,
    pub records_uploaded: u64,
}

impl DispatchSummary {
    fn merge(mut self, other: DispatchSummary) -> Self {
        self.batches_uploaded += other.batches_uploaded;
        self.records_uploaded += other.records_uploaded;
        self
    }
}

pub struct UploadDispatcher {
    sender: mpsc::Sender<Job>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    failure: Arc<StdMutex<Option<UploadFailure>>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<DispatchSummary>>,
    submitted: u64,
}

impl UploadDispatcher {
    /// Start `workers` upload tasks sharing `sink`.
    ///
    /// Zero workers or a zero ceiling are raised to one.
    pub fn spawn(sink: Arc<dyn Sink>, workers: usize, max_in_flight: usize) -> Self {
        let workers = workers.max(1);
        let max_in_flight = max_in_flight.max(1);

        let (sender, receiver) = mpsc::channel::<Job>(max_in_flight);
        let receiver = Arc::new(Mutex::new(receiver));
        let failure = Arc::new(StdMutex::new(None));
        let cancel = CancellationToken::new();

        info!(workers, max_in_flight, sink = sink.name(), "Starting upload workers");

        let handles = (0..workers)
            .map(|worker_id| {
                let worker = UploadWorker {
                    sink: sink.clone(),
                    receiver: receiver.clone(),
                    failure: failure.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(
                    worker
                        .run()
                        .instrument(tracing::debug_span!("upload_worker", worker_id)),
                )
            })
            .collect();

        Self {
            sender,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            failure,
            cancel,
            workers: handles,
            submitted: 0,
        }
    }

    /// Hand a task to the pool, waiting while the in-flight ceiling is reached.
    ///
    /// Fails without submitting once any upload has failed.
    pub async fn submit(&mut self, task: UploadTask) -> std::result::Result<(), UploadFailure> {
        self.check_failure()?;

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.failure_or(task.sequence)),
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(self.failure_or(task.sequence)),
            },
        };

        // a failure may have landed while we waited for the permit
        self.check_failure()?;

        let sequence = task.sequence;
        let records = task.len();
        if self.sender.send((task, permit)).await.is_err() {
            return Err(self.failure_or(sequence));
        }
        self.submitted += 1;
        debug!(sequence, records, in_flight = self.in_flight(), "Batch submitted");
        Ok(())
    }

    /// Wait for every submitted task and report the first failure, if any
    pub async fn drain(self) -> Result<DispatchSummary> {
        let Self {
            sender,
            workers,
            failure,
            submitted,
            ..
        } = self;
        drop(sender);

        let mut summary = DispatchSummary::default();
        let mut worker_error = None;
        for handle in workers {
            match handle.await {
                Ok(report) => summary = summary.merge(report),
                Err(e) => {
                    error!(error = %e, "Upload worker panicked");
                    worker_error.get_or_insert_with(|| IngestError::worker(e.to_string()));
                },
            }
        }

        if let Some(failure) = lock(&failure).clone() {
            return Err(failure.into());
        }
        if let Some(err) = worker_error {
            return Err(err);
        }

        info!(
            submitted,
            batches = summary.batches_uploaded,
            records = summary.records_uploaded,
            "Uploads drained"
        );
        Ok(summary)
    }

    /// Submitted tasks whose sink call has not returned yet
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn failure(&self) -> Option<UploadFailure> {
        lock(&self.failure).clone()
    }

    fn check_failure(&self) -> std::result::Result<(), UploadFailure> {
        match self.failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn failure_or(&self, sequence: u64) -> UploadFailure {
        self.failure().unwrap_or_else(|| UploadFailure {
            sequence,
            message: "upload workers stopped".to_string(),
        })
    }
}

struct UploadWorker {
    sink: Arc<dyn Sink>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    failure: Arc<StdMutex<Option<UploadFailure>>>,
    cancel: CancellationToken,
}

impl UploadWorker {
    async fn run(self) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        loop {
            let job = self.receiver.lock().await.recv().await;
            let Some((task, permit)) = job else {
                break;
            };

            match self.sink.upload(&task).await {
                Ok(()) => {
                    summary.batches_uploaded += 1;
                    summary.records_uploaded += task.len() as u64;
                },
                Err(e) => {
                    error!(sequence = task.sequence, records = task.len(), error = %e, "Batch upload failed");
                    lock(&self.failure).get_or_insert_with(|| UploadFailure {
                        sequence: task.sequence,
                        message: e.to_string(),
                    });
                    self.cancel.cancel();
                },
            }

            // released only after the failure is visible to `submit`
            drop(permit);
        }

        debug!(batches = summary.batches_uploaded, "Upload worker finished");
        summary
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_support::{records, RecordingSink};
    use loyalty_common::{Batch, BatchKind};
    use std::time::Duration;

    fn task(sequence: u64, len: u64) -> UploadTask {
        UploadTask::new(sequence, Batch::new(records(0, len), BatchKind::Full))
    }

    #[tokio::test]
    async fn test_all_tasks_delivered_once() {
        let sink = Arc::new(RecordingSink::new());
        let mut dispatcher = UploadDispatcher::spawn(sink.clone(), 3, 4);

        for sequence in 1..=10 {
            dispatcher.submit(task(sequence, 5)).await.unwrap();
        }
        let summary = dispatcher.drain().await.unwrap();

        assert_eq!(summary.batches_uploaded, 10);
        assert_eq!(summary.records_uploaded, 50);
        let mut sequences = sink.sequences();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_ceiling_and_worker_count() {
        let sink = Arc::new(RecordingSink::new().with_delay(Duration::from_millis(10)));
        let mut dispatcher = UploadDispatcher::spawn(sink.clone(), 2, 3);

        for sequence in 1..=7 {
            dispatcher.submit(task(sequence, 1)).await.unwrap();
            assert!(dispatcher.in_flight() <= 3);
        }
        let summary = dispatcher.drain().await.unwrap();

        assert_eq!(summary.batches_uploaded, 7);
        assert!(sink.max_concurrent() <= 2);
        assert_eq!(sink.sequences().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_stops_submission() {
        let sink = Arc::new(
            RecordingSink::new()
                .with_delay(Duration::from_millis(10))
                .failing_on(3),
        );
        let mut dispatcher = UploadDispatcher::spawn(sink.clone(), 2, 3);

        let mut refused = None;
        for sequence in 1..=7 {
            if let Err(failure) = dispatcher.submit(task(sequence, 1)).await {
                refused = Some((sequence, failure));
                break;
            }
        }

        let (refused_at, failure) = refused.expect("a submit should be refused");
        assert_eq!(failure.sequence, 3);
        assert!(refused_at >= 4 && refused_at <= 6);
        assert_eq!(dispatcher.submitted(), refused_at - 1);

        match dispatcher.drain().await {
            Err(IngestError::Upload { sequence, .. }) => assert_eq!(sequence, 3),
            other => panic!("unexpected {:?}", other),
        }

        let delivered = sink.sequences();
        assert!(delivered.contains(&3));
        assert!(!delivered.contains(&6));
        assert!(!delivered.contains(&7));
    }

    #[tokio::test]
    async fn test_drain_with_nothing_submitted() {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = UploadDispatcher::spawn(sink.clone(), 2, 3);

        assert_eq!(dispatcher.drain().await.unwrap(), DispatchSummary::default());
        assert!(sink.sequences().is_empty());
    }
}
