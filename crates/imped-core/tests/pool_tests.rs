use imped_core::{
    partition, ErrorKind, NoProgress, PersonRecord, ProgressEvent, SessionPool, VerifyOptions,
};
use imped_test_utils::{roster, PersonScript, ScriptedPortal, TestDirs};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn pool(portal: &ScriptedPortal, dirs: &TestDirs) -> SessionPool {
    SessionPool::new(
        Arc::new(portal.clone()),
        Arc::new(portal.verifier(&dirs.temp)),
    )
}

fn ids(people: impl IntoIterator<Item = String>) -> Vec<String> {
    people.into_iter().collect()
}

#[tokio::test]
async fn five_people_two_workers_one_failure() {
    let dirs = TestDirs::new();
    let people = roster(5);
    let portal = ScriptedPortal::new().with_roster(&people);
    portal.script(
        &people[2].id,
        PersonScript::found(people[2].name.clone()).rejecting("ERROR", "Datos inconsistentes"),
    );

    let chunks = partition(&people, 2).unwrap();
    assert_eq!(
        chunks.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![3, 2]
    );

    let outcome = pool(&portal, &dirs)
        .run(chunks, VerifyOptions::default(), &NoProgress)
        .await;

    assert_eq!(outcome.processed(), 5);
    assert_eq!(outcome.results.len(), 4);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].person, people[2]);
    assert_eq!(outcome.failures[0].error.kind, ErrorKind::Verification);

    // chunk order is preserved in the merge
    assert_eq!(
        ids(outcome.results.iter().map(|r| r.id.clone())),
        ids([0, 1, 3, 4].map(|i| people[i].id.clone()))
    );

    let stats = portal.stats();
    assert_eq!(stats.sessions_opened, 2);
    assert_eq!(stats.sessions_closed, 2);
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.pages_opened, 5);
    assert_eq!(stats.pages_closed, 5);
}

#[tokio::test]
async fn chunk_session_closed_once_even_if_all_fail() {
    let dirs = TestDirs::new();
    let people = roster(3);
    // nobody scripted: every lookup shows the not-found dialog
    let portal = ScriptedPortal::new();

    let outcome = pool(&portal, &dirs)
        .run_roster(&people, 1, VerifyOptions::default(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(outcome.failures.len(), 3);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.error.kind == ErrorKind::PersonNotFound));
    let stats = portal.stats();
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.sessions_closed, 1);
}

#[tokio::test]
async fn launch_failure_fails_only_that_chunk() {
    let dirs = TestDirs::new();
    let people = roster(4);
    let portal = ScriptedPortal::new().with_roster(&people);
    portal.fail_next_launches(1);

    let outcome = pool(&portal, &dirs)
        .run_roster(&people, 2, VerifyOptions::default(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.error.kind == ErrorKind::Session));
    assert_eq!(portal.stats().launch_failures, 1);
}

#[tokio::test]
async fn progress_reports_every_person_and_callback_errors_are_ignored() {
    let dirs = TestDirs::new();
    let people = roster(4);
    let portal = ScriptedPortal::new().with_roster(&people);
    portal.script(
        &people[1].id,
        PersonScript::found(people[1].name.clone()).rejecting("ERROR", "x"),
    );

    let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
    let sink = {
        let seen = Arc::clone(&seen);
        move |event: &ProgressEvent| -> anyhow::Result<()> {
            seen.lock().push(event.clone());
            anyhow::bail!("terminal went away")
        }
    };

    let outcome = pool(&portal, &dirs)
        .run_roster(&people, 2, VerifyOptions::default(), &sink)
        .await
        .unwrap();

    assert_eq!(outcome.processed(), 4);
    let seen = seen.lock();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen.iter().filter(|e| e.success).count(), 3);
    let failed = seen.iter().find(|e| !e.success).unwrap();
    assert_eq!(failed.id, people[1].id);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn sessions_never_exceed_chunk_count() {
    let dirs = TestDirs::new();
    let people: Vec<PersonRecord> = roster(9);
    let portal = ScriptedPortal::new().with_roster(&people);

    let outcome = pool(&portal, &dirs)
        .run_roster(&people, 3, VerifyOptions::with_download(), &NoProgress)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 9);
    assert!(portal.stats().peak_sessions <= 3);
    for result in &outcome.results {
        assert!(result.temp_dir.as_ref().is_some_and(|d| d.is_dir()));
    }
}

#[tokio::test]
async fn zero_workers_is_a_batch_error() {
    let dirs = TestDirs::new();
    let portal = ScriptedPortal::new();
    let result = pool(&portal, &dirs)
        .run_roster(&roster(2), 0, VerifyOptions::default(), &NoProgress)
        .await;
    assert!(result.is_err());
}
