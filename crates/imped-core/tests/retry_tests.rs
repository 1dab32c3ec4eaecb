use async_trait::async_trait;
use imped_core::{
    AlwaysRetry, BatchError, BatchOutcome, Consolidator, ErrorKind, FailureRecord, NeverRetry,
    NoObserver,
    PersonRecord, Pipeline, ProgressEvent, ProgressSink, RetryDecision, RetryLoop,
    RoundObserver, RoundOutcome, RoundRunner, RunLedger, SessionPool, VerificationResult,
    VerifyError,
};
use imped_test_utils::{person, roster, PersonScript, ScriptedPortal, TestDirs};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Runner that fails each id a fixed number of times before succeeding
struct FlakyRunner {
    failures_left: Mutex<Vec<(String, u32)>>,
    rounds_seen: Mutex<Vec<Vec<String>>>,
}

impl FlakyRunner {
    fn new(plan: &[(&str, u32)]) -> Self {
        Self {
            failures_left: Mutex::new(plan.iter().map(|(id, n)| (id.to_string(), *n)).collect()),
            rounds_seen: Mutex::default(),
        }
    }
}

#[async_trait]
impl RoundRunner for FlakyRunner {
    async fn run_round(
        &self,
        people: Vec<PersonRecord>,
        round: u32,
    ) -> Result<RoundOutcome, BatchError> {
        self.rounds_seen
            .lock()
            .push(people.iter().map(|p| p.id.clone()).collect());

        let mut batch = BatchOutcome::default();
        let mut plan = self.failures_left.lock();
        for person in people {
            let left = plan.iter_mut().find(|(id, _)| *id == person.id);
            match left {
                Some((_, n)) if *n > 0 => {
                    *n -= 1;
                    batch.failures.push(FailureRecord::new(
                        person,
                        &VerifyError::Ocr("unreadable".to_string()),
                    ));
                }
                _ => batch.results.push(VerificationResult {
                    id: person.id.clone(),
                    name: person.name.clone(),
                    birth_date: person.birth_date.clone(),
                    has_impediment: None,
                    temp_dir: None,
                }),
            }
        }
        Ok(RoundOutcome {
            round,
            batch,
            ..RoundOutcome::default()
        })
    }
}

fn people(ids: &[&str]) -> Vec<PersonRecord> {
    ids.iter().map(|id| PersonRecord::new(*id, *id, "1/1/90")).collect()
}

#[tokio::test]
async fn retry_round_leaves_only_new_failures() {
    let runner = FlakyRunner::new(&[("A", 1), ("B", 2)]);

    let ledger = RetryLoop::new()
        .with_max_rounds(2)
        .run(people(&["A", "B"]), &runner, &AlwaysRetry, &NoObserver)
        .await
        .unwrap();

    let outstanding: Vec<_> = ledger.outstanding().iter().map(|f| f.person.id.as_str()).collect();
    assert_eq!(outstanding, vec!["B"]);
    let results: Vec<_> = ledger.results().map(|r| r.id.as_str()).collect();
    assert_eq!(results, vec!["A"]);
    assert_eq!(ledger.rounds(), 2);
    assert_eq!(
        *runner.rounds_seen.lock(),
        vec![vec!["A".to_string(), "B".to_string()], vec!["A".to_string(), "B".to_string()]]
    );
}

#[tokio::test]
async fn reruns_exactly_the_failed_subset() {
    let runner = FlakyRunner::new(&[("B", 1)]);

    let ledger = RetryLoop::new()
        .run(people(&["A", "B", "C"]), &runner, &AlwaysRetry, &NoObserver)
        .await
        .unwrap();

    assert!(ledger.outstanding().is_empty());
    assert_eq!(ledger.succeeded(), 3);
    assert_eq!(
        *runner.rounds_seen.lock(),
        vec![
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec!["B".to_string()],
        ]
    );
}

#[tokio::test]
async fn negative_decision_stops_after_first_round() {
    let runner = FlakyRunner::new(&[("A", 5)]);

    let ledger = RetryLoop::new()
        .run(people(&["A", "B"]), &runner, &NeverRetry, &NoObserver)
        .await
        .unwrap();

    assert_eq!(ledger.rounds(), 1);
    assert_eq!(ledger.outstanding().len(), 1);
    assert_eq!(runner.rounds_seen.lock().len(), 1);
}

struct CountingDecision {
    answers: Mutex<Vec<bool>>,
    asked_with: Mutex<Vec<(usize, u32)>>,
}

#[async_trait]
impl RetryDecision for CountingDecision {
    async fn should_retry(&self, outstanding: &[FailureRecord], round: u32) -> bool {
        self.asked_with.lock().push((outstanding.len(), round));
        let mut answers = self.answers.lock();
        if answers.is_empty() {
            false
        } else {
            answers.remove(0)
        }
    }
}

#[tokio::test]
async fn decision_sees_outstanding_and_round() {
    let runner = FlakyRunner::new(&[("A", 3), ("B", 1)]);
    let decision = CountingDecision {
        answers: Mutex::new(vec![true, false]),
        asked_with: Mutex::default(),
    };

    let ledger = RetryLoop::new()
        .run(people(&["A", "B"]), &runner, &decision, &NoObserver)
        .await
        .unwrap();

    assert_eq!(*decision.asked_with.lock(), vec![(2, 1), (1, 2)]);
    assert_eq!(ledger.rounds(), 2);
}

struct FailingObserver;

#[async_trait]
impl RoundObserver for FailingObserver {
    async fn round_completed(
        &self,
        _round: &RoundOutcome,
        _ledger: &RunLedger,
    ) -> Result<(), BatchError> {
        Err(BatchError::InvalidWorkerCount(0))
    }
}

#[tokio::test]
async fn observer_error_aborts_the_loop() {
    let runner = FlakyRunner::new(&[("A", 1)]);
    let result = RetryLoop::new()
        .run(people(&["A"]), &runner, &AlwaysRetry, &FailingObserver)
        .await;
    assert!(result.is_err());
    assert_eq!(runner.rounds_seen.lock().len(), 1);
}

#[derive(Default)]
struct RoundLog {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RoundLog {
    fn on_progress(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.id.clone());
        Ok(())
    }

    fn round_started(&self, round: u32, people: usize, workers: usize) {
        self.events
            .lock()
            .push(format!("start {round}: {people} on {workers}"));
    }
}

#[tokio::test]
async fn pipeline_round_downloads_and_consolidates() {
    let dirs = TestDirs::new();
    let people = roster(3);
    let portal = ScriptedPortal::new().with_roster(&people);
    let pool = SessionPool::new(
        Arc::new(portal.clone()),
        Arc::new(portal.verifier(&dirs.temp)),
    );
    let log = Arc::new(RoundLog::default());
    let pipeline = Pipeline::new(pool, 8)
        .with_downloads(Consolidator::new(&dirs.output))
        .with_progress(log.clone());

    let outcome = pipeline.run_round(people.clone(), 1).await.unwrap();

    assert_eq!(outcome.report.processed, 3);
    assert_eq!(outcome.report.succeeded, 3);
    assert_eq!(outcome.certificates.len(), 3);
    assert!(outcome.batch.results.iter().all(|r| r.temp_dir.is_none()));
    for person in &people {
        let relative = outcome.certificates.get(&person.id).unwrap();
        assert!(dirs.output.join(relative).is_file());
        assert!(!dirs.temp.join(&person.id).exists());
    }
    // worker count is capped by the people in the round
    assert_eq!(log.events.lock()[0], "start 1: 3 on 3");
    assert_eq!(portal.stats().sessions_opened, 3);
}

#[tokio::test]
async fn pipeline_retry_recovers_after_launch_failure() {
    let dirs = TestDirs::new();
    let people = roster(4);
    let portal = ScriptedPortal::new().with_roster(&people);
    portal.script(
        &person(4).id,
        PersonScript::found(person(4).name).rejecting("ERROR", "Servicio no disponible"),
    );
    portal.fail_next_launches(1);

    let pool = SessionPool::new(
        Arc::new(portal.clone()),
        Arc::new(portal.verifier(&dirs.temp)),
    );
    let pipeline = Pipeline::new(pool, 2);

    let ledger = RetryLoop::new()
        .with_max_rounds(3)
        .run(people.clone(), &pipeline, &AlwaysRetry, &NoObserver)
        .await
        .unwrap();

    let succeeded: HashSet<_> = ledger.results().map(|r| r.id.clone()).collect();
    assert_eq!(succeeded.len(), 3);
    assert!(!succeeded.contains(&person(4).id));
    assert_eq!(ledger.outstanding().len(), 1);
    assert_eq!(ledger.rounds(), 3);
    assert!(ledger.report_rows(false).iter().all(|row| row.certificate.is_none()));
}

/// Clears a file squatting on the output root, then agrees to retry
struct ClearOutputRoot {
    output: PathBuf,
    seen: Mutex<Vec<ErrorKind>>,
}

#[async_trait]
impl RetryDecision for ClearOutputRoot {
    async fn should_retry(&self, outstanding: &[FailureRecord], _round: u32) -> bool {
        self.seen
            .lock()
            .extend(outstanding.iter().map(|f| f.error.kind));
        std::fs::remove_file(&self.output).unwrap();
        true
    }
}

#[tokio::test]
async fn failed_consolidation_is_a_retryable_failure() {
    let dirs = TestDirs::new();
    std::fs::write(&dirs.output, b"not a directory").unwrap();
    let people = vec![person(1)];
    let portal = ScriptedPortal::new().with_roster(&people);
    let pool = SessionPool::new(
        Arc::new(portal.clone()),
        Arc::new(portal.verifier(&dirs.temp)),
    );
    let pipeline = Pipeline::new(pool, 1).with_downloads(Consolidator::new(&dirs.output));

    let first = pipeline.run_round(people.clone(), 1).await.unwrap();
    assert!(first.batch.results.is_empty());
    assert_eq!(first.batch.failures.len(), 1);
    assert_eq!(first.batch.failures[0].person, person(1));
    assert_eq!(first.batch.failures[0].error.kind, ErrorKind::Consolidation);
    assert_eq!(first.report.succeeded, 0);
    assert_eq!(first.report.failed, 1);
    assert!(first.certificates.is_empty());
    // artifact stays in its temp directory until a retry replaces it
    assert!(dirs.temp.join(&person(1).id).exists());

    let decision = ClearOutputRoot {
        output: dirs.output.clone(),
        seen: Mutex::default(),
    };
    let ledger = RetryLoop::new()
        .with_max_rounds(2)
        .run(people, &pipeline, &decision, &NoObserver)
        .await
        .unwrap();

    assert_eq!(*decision.seen.lock(), vec![ErrorKind::Consolidation]);
    assert!(ledger.outstanding().is_empty());
    assert_eq!(ledger.succeeded(), 1);
    let relative = ledger.certificates().get(&person(1).id).unwrap();
    assert!(dirs.output.join(relative).is_file());
    assert!(!dirs.temp.join(&person(1).id).exists());
}
