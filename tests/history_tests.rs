mod common;

use common::{collect_run, PhaseScript, ScriptedProbe};
use speedofme::{Error, ResultsStore, SqliteResults, TestController, TestEvent};
use tempfile::TempDir;

/// Appends the run's result the way a `succeeded` subscriber does.
fn record(store: &dyn ResultsStore, run: &[TestEvent]) -> Option<(f64, f64)> {
    match run.last() {
        Some(TestEvent::Succeeded {
            download_speed,
            upload_speed,
        }) => {
            store.add_result(*download_speed, *upload_speed).unwrap();
            Some((*download_speed, *upload_speed))
        }
        _ => None,
    }
}

#[test]
fn test_empty_store_get_last_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = SqliteResults::open(dir.path().join("history.db")).unwrap();

    assert!(store.is_empty().unwrap());
    assert!(matches!(store.get_last(), Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_successful_run_is_recorded() {
    let dir = TempDir::new().unwrap();
    let store = SqliteResults::open(dir.path().join("history.db")).unwrap();
    let probe = ScriptedProbe::new(
        PhaseScript::ok(50.0).with_samples(&[(100, 50.0)]),
        PhaseScript::ok(10.0).with_samples(&[(100, 10.0)]),
    );
    let controller = TestController::new(probe);
    let mut events = controller.subscribe();

    controller.start().unwrap();
    let run = collect_run(&mut events).await;

    assert_eq!(record(&store, &run), Some((50.0, 10.0)));
    assert!(!store.is_empty().unwrap());
    assert_eq!(store.get_last().unwrap().speeds(), (50.0, 10.0));
}

#[tokio::test]
async fn test_two_runs_append_two_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    {
        let store = SqliteResults::open(&path).unwrap();
        store.add_result(1.0, 1.0).unwrap();
    }

    let store = SqliteResults::open(&path).unwrap();
    let initial = store.len().unwrap();
    let probe = ScriptedProbe::sequence(
        vec![PhaseScript::ok(50.0), PhaseScript::ok(95.5)],
        vec![PhaseScript::ok(10.0), PhaseScript::ok(22.0)],
    );
    let controller = TestController::new(probe);
    let mut events = controller.subscribe();

    for _ in 0..2 {
        controller.start().unwrap();
        let run = collect_run(&mut events).await;
        assert!(record(&store, &run).is_some());
    }

    assert_eq!(store.len().unwrap(), initial + 2);
    assert_eq!(store.get_last().unwrap().speeds(), (95.5, 22.0));
}

#[tokio::test]
async fn test_failed_run_leaves_history_untouched() {
    let dir = TempDir::new().unwrap();
    let store = SqliteResults::open(dir.path().join("history.db")).unwrap();
    let probe = ScriptedProbe::new(PhaseScript::ok(5.0), PhaseScript::failing("reset by peer"));
    let controller = TestController::new(probe);
    let mut events = controller.subscribe();

    controller.start().unwrap();
    let run = collect_run(&mut events).await;

    assert_eq!(record(&store, &run), None);
    assert!(store.is_empty().unwrap());
}
