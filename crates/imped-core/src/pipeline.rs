//! One full pass: partition, orchestrate, consolidate
//!
//! [`Pipeline`] is the production [`RoundRunner`]: it bounds the worker
//! count by the people in the round, runs the session pool, moves finished
//! artifacts into final storage and measures the pass.

use crate::consolidate::Consolidator;
use crate::error::{BatchError, ConsolidateError, VerifyError};
use crate::partition::partition;
use crate::pool::{NoProgress, ProgressSink, SessionPool};
use crate::report::RunClock;
use crate::retry::{RoundOutcome, RoundRunner};
use crate::types::{
    BatchOutcome, CertificatePaths, FailureRecord, PersonRecord, VerificationResult, VerifyOptions,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Production round runner
#[derive(Clone)]
pub struct Pipeline {
    pool: SessionPool,
    consolidator: Option<Consolidator>,
    workers: usize,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pool", &self.pool)
            .field("consolidator", &self.consolidator)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create pipeline running up to `workers` sessions, without downloads
    #[must_use]
    pub fn new(pool: SessionPool, workers: usize) -> Self {
        Self {
            pool,
            consolidator: None,
            workers,
            progress: Arc::new(NoProgress),
        }
    }

    /// Download certificates and consolidate them with `consolidator`
    #[inline]
    #[must_use]
    pub fn with_downloads(mut self, consolidator: Consolidator) -> Self {
        self.consolidator = Some(consolidator);
        self
    }

    /// With a live progress sink
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Per-person options derived from the configuration
    #[inline]
    #[must_use]
    pub fn options(&self) -> VerifyOptions {
        VerifyOptions {
            download_artifact: self.consolidator.is_some(),
        }
    }

    /// Configured worker cap
    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }
}

#[async_trait]
impl RoundRunner for Pipeline {
    async fn run_round(
        &self,
        people: Vec<PersonRecord>,
        round: u32,
    ) -> Result<RoundOutcome, BatchError> {
        let clock = RunClock::start();
        let workers = self.workers.min(people.len()).max(1);
        let chunks = partition(&people, workers)?;

        self.progress.round_started(round, people.len(), chunks.len());
        let mut batch = self
            .pool
            .run(chunks, self.options(), self.progress.as_ref())
            .await;
        self.progress.round_finished(round);

        let (certificates, skipped) = match &self.consolidator {
            Some(consolidator) => {
                let consolidation = consolidator.consolidate(&batch.results).await;
                demote_unconsolidated(&mut batch, &people, consolidation.failures);
                for result in &mut batch.results {
                    if consolidation.paths.get(&result.id).is_some() {
                        result.temp_dir = None;
                    }
                }
                (consolidation.paths, consolidation.skipped)
            }
            None => (CertificatePaths::new(), Vec::new()),
        };

        let report = clock.finish(
            batch.processed(),
            batch.results.len(),
            batch.failures.len(),
        );
        Ok(RoundOutcome {
            round,
            batch,
            certificates,
            skipped,
            report,
        })
    }
}

/// Turn results whose artifact could not be consolidated into failures
///
/// The person record comes from the round's input so a retry re-submits
/// exactly what the roster listed.
fn demote_unconsolidated(
    batch: &mut BatchOutcome,
    people: &[PersonRecord],
    failures: Vec<(String, ConsolidateError)>,
) {
    for (id, error) in failures {
        let Some(index) = batch.results.iter().position(|r| r.id == id) else {
            continue;
        };
        let result = batch.results.remove(index);
        let person = people
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .unwrap_or_else(|| fallback_person(&result));
        batch
            .failures
            .push(FailureRecord::new(person, &VerifyError::from(error)));
    }
}

fn fallback_person(result: &VerificationResult) -> PersonRecord {
    PersonRecord::new(&result.id, &result.name, &result.birth_date)
}
