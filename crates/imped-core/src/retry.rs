//! Retry loop over outstanding failures
//!
//! An explicit state machine over `{outstanding failures, round count}`:
//! round 1 runs the whole roster, every later round re-runs exactly the
//! previous round's failures. A pluggable [`RetryDecision`] answers whether
//! to go again, so the loop runs unattended under test.

use crate::error::BatchError;
use crate::report::{build_rows, BatchRunReport, ReportRow};
use crate::types::{BatchOutcome, CertificatePaths, FailureRecord, PersonRecord, VerificationResult};
use async_trait::async_trait;
use indexmap::IndexMap;

/// Everything one round produced
#[derive(Debug, Clone, Default)]
pub struct RoundOutcome {
    /// Round number, starting at 1
    pub round: u32,
    /// Results and failures of the round
    pub batch: BatchOutcome,
    /// Certificates consolidated in the round
    pub certificates: CertificatePaths,
    /// Ids whose temp directory held no finished artifact
    pub skipped: Vec<String>,
    /// Timing and counts of the round
    pub report: BatchRunReport,
}

/// Runs one round over a set of people
#[async_trait]
pub trait RoundRunner: Send + Sync {
    /// Verify `people` and consolidate what succeeded
    async fn run_round(&self, people: Vec<PersonRecord>, round: u32)
        -> Result<RoundOutcome, BatchError>;
}

/// Decides whether outstanding failures get another round
#[async_trait]
pub trait RetryDecision: Send + Sync {
    /// `round` is the number of the round that just finished
    async fn should_retry(&self, outstanding: &[FailureRecord], round: u32) -> bool;
}

/// Retry until nothing is outstanding
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

#[async_trait]
impl RetryDecision for AlwaysRetry {
    async fn should_retry(&self, _outstanding: &[FailureRecord], _round: u32) -> bool {
        true
    }
}

/// Never retry
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

#[async_trait]
impl RetryDecision for NeverRetry {
    async fn should_retry(&self, _outstanding: &[FailureRecord], _round: u32) -> bool {
        false
    }
}

/// Notified after each round is absorbed into the ledger
#[async_trait]
pub trait RoundObserver: Send + Sync {
    /// A round finished
    ///
    /// # Errors
    /// Any error aborts the loop.
    async fn round_completed(&self, round: &RoundOutcome, ledger: &RunLedger)
        -> Result<(), BatchError>;
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

#[async_trait]
impl RoundObserver for NoObserver {
    async fn round_completed(
        &self,
        _round: &RoundOutcome,
        _ledger: &RunLedger,
    ) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Cumulative state across rounds
#[derive(Debug, Clone, Default)]
pub struct RunLedger {
    results: IndexMap<String, VerificationResult>,
    certificates: CertificatePaths,
    outstanding: Vec<FailureRecord>,
    rounds: u32,
}

impl RunLedger {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a round: new successes join the result set, certificates merge
    /// with later rounds winning, and the round's failures replace the
    /// outstanding set.
    pub fn absorb(&mut self, outcome: &RoundOutcome) {
        for result in &outcome.batch.results {
            self.results.insert(result.id.clone(), result.clone());
        }
        self.certificates.merge(outcome.certificates.clone());
        self.outstanding.clone_from(&outcome.batch.failures);
        self.rounds = self.rounds.max(outcome.round);
    }

    /// Successful results, first success order
    pub fn results(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.values()
    }

    /// Number of distinct successful people
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.len()
    }

    /// Final certificate paths
    #[inline]
    #[must_use]
    pub fn certificates(&self) -> &CertificatePaths {
        &self.certificates
    }

    /// Failures of the latest round
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> &[FailureRecord] {
        &self.outstanding
    }

    /// Rounds run so far
    #[inline]
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Report rows for every success so far
    #[must_use]
    pub fn report_rows(&self, with_certificates: bool) -> Vec<ReportRow> {
        build_rows(
            self.results.values(),
            with_certificates.then_some(&self.certificates),
        )
    }
}

/// Drives rounds until nothing is outstanding or the decision says stop
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryLoop {
    max_rounds: Option<u32>,
}

impl RetryLoop {
    /// Create loop without a round cap
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `rounds` rounds in total, including the first
    #[inline]
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    /// Run the roster, then retry failures while `decision` agrees
    ///
    /// # Errors
    /// Batch-level failures from the runner or the observer abort the loop.
    pub async fn run(
        &self,
        roster: Vec<PersonRecord>,
        runner: &dyn RoundRunner,
        decision: &dyn RetryDecision,
        observer: &dyn RoundObserver,
    ) -> Result<RunLedger, BatchError> {
        let mut ledger = RunLedger::new();
        let mut people = roster;
        let mut round = 1;

        loop {
            tracing::info!("round {} starting with {} people", round, people.len());
            let outcome = runner.run_round(people, round).await?;
            ledger.absorb(&outcome);
            tracing::info!(
                "round {} finished: {} succeeded, {} failed",
                round,
                outcome.batch.results.len(),
                outcome.batch.failures.len()
            );
            observer.round_completed(&outcome, &ledger).await?;

            if ledger.outstanding().is_empty() {
                break;
            }
            if self.max_rounds.is_some_and(|max| round >= max) {
                tracing::info!("round cap of {} reached", round);
                break;
            }
            if !decision.should_retry(ledger.outstanding(), round).await {
                break;
            }

            people = ledger
                .outstanding()
                .iter()
                .map(|failure| failure.person.clone())
                .collect();
            round += 1;
        }

        Ok(ledger)
    }
}
