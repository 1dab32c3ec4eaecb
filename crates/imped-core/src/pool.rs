//! Session pool orchestrator
//!
//! Runs one worker per roster chunk. Each worker owns its own automation
//! session and verifies its people strictly one after another; chunks run
//! concurrently on the caller's task. Workers return their own accumulators,
//! which are merged in chunk order once every worker is done.

use crate::error::VerifyError;
use crate::partition::partition;
use crate::session::SessionFactory;
use crate::types::{BatchOutcome, FailureRecord, PersonRecord, ProgressEvent, VerifyOptions};
use crate::verifier::Verifier;
use crate::BatchError;
use std::sync::Arc;

/// Receives live progress
///
/// Called between awaits on the orchestrator's task, so implementations must
/// not block. Errors are logged and never abort the batch.
pub trait ProgressSink: Send + Sync {
    /// A person finished
    fn on_progress(&self, event: &ProgressEvent) -> anyhow::Result<()>;

    /// A round is about to start
    fn round_started(&self, _round: u32, _people: usize, _workers: usize) {}

    /// A round finished
    fn round_finished(&self, _round: u32) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Progress sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _event: &ProgressEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Orchestrates verification across independent sessions
#[derive(Clone)]
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    verifier: Arc<Verifier>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Create pool
    #[inline]
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, verifier: Arc<Verifier>) -> Self {
        Self { factory, verifier }
    }

    /// Verifier shared by all workers
    #[inline]
    #[must_use]
    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Partition `roster` over `workers` sessions and run it
    ///
    /// # Errors
    /// - `BatchError::InvalidWorkerCount` if `workers` is zero
    pub async fn run_roster(
        &self,
        roster: &[PersonRecord],
        workers: usize,
        options: VerifyOptions,
        progress: &dyn ProgressSink,
    ) -> Result<BatchOutcome, BatchError> {
        let chunks = partition(roster, workers)?;
        Ok(self.run(chunks, options, progress).await)
    }

    /// Run every chunk concurrently, one session per chunk
    ///
    /// Every person ends up in exactly one of `results` or `failures`.
    pub async fn run(
        &self,
        chunks: Vec<Vec<PersonRecord>>,
        options: VerifyOptions,
        progress: &dyn ProgressSink,
    ) -> BatchOutcome {
        let workers = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| self.run_chunk(index, chunk, options, progress));

        let mut merged = BatchOutcome::default();
        for outcome in futures::future::join_all(workers).await {
            merged.merge(outcome);
        }
        merged
    }

    async fn run_chunk(
        &self,
        index: usize,
        chunk: Vec<PersonRecord>,
        options: VerifyOptions,
        progress: &dyn ProgressSink,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        let session = match self.factory.new_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("worker {} could not start a session: {}", index, e);
                let err = VerifyError::Session(e);
                for person in chunk {
                    let failure = FailureRecord::new(person, &err);
                    report(progress, &ProgressEvent::failed(&failure));
                    outcome.failures.push(failure);
                }
                return outcome;
            }
        };

        tracing::debug!("worker {} started with {} people", index, chunk.len());

        for person in chunk {
            match self
                .verifier
                .verify_person(session.as_ref(), &person, options)
                .await
            {
                Ok(result) => {
                    report(progress, &ProgressEvent::succeeded(&result));
                    outcome.results.push(result);
                }
                Err(e) => {
                    let failure = FailureRecord::new(person, &e);
                    report(progress, &ProgressEvent::failed(&failure));
                    outcome.failures.push(failure);
                }
            }
        }

        if let Err(e) = session.close().await {
            tracing::warn!("worker {} failed to close its session: {}", index, e);
        }
        tracing::debug!(
            "worker {} finished: {} ok, {} failed",
            index,
            outcome.results.len(),
            outcome.failures.len()
        );

        outcome
    }
}

fn report(progress: &dyn ProgressSink, event: &ProgressEvent) {
    if let Err(e) = progress.on_progress(event) {
        tracing::warn!("progress callback failed for {}: {}", event.id, e);
    }
}
