use barctl::channel::SimulatedServer;
use barctl::core::{
    JobState, Notification, PollError, PollerConfig, PresentationHint,
    ServerRunState, SortKey, SyncEngine,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

fn engine(server: &Arc<SimulatedServer>) -> SyncEngine {
    SyncEngine::new(server.clone(), PollerConfig::default(), SortKey::Name)
}

#[tokio::test]
async fn test_waiting_job_with_unlimited_parts() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("abc", "abc", JobState::Waiting);
    let mut engine = engine(&server);

    engine.refresh().await.unwrap();

    let jobs = engine.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].uuid, "abc");
    assert_eq!(jobs[0].state, JobState::Waiting);
    assert_eq!(jobs[0].part_size_text(), "unlimited");
    assert_eq!(jobs[0].hint(), PresentationHint::Neutral);
    assert_eq!(engine.rows()[0].hint, PresentationHint::Neutral);
}

#[tokio::test]
async fn test_unchanged_list_keeps_rows() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Waiting);
    server.add_job("j2", "mail", JobState::Done);
    let mut engine = engine(&server);

    engine.refresh().await.unwrap();
    let handles: Vec<_> = engine.rows().iter().map(|row| row.handle.clone()).collect();
    let jobs = engine.list_jobs();

    engine.refresh().await.unwrap();

    assert_eq!(engine.list_jobs(), jobs);
    for (row, before) in engine.rows().iter().zip(&handles) {
        assert!(row.handle.same(before));
    }
}

#[tokio::test]
async fn test_changed_job_updates_in_place() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Waiting);
    let mut engine = engine(&server);
    engine.refresh().await.unwrap();
    let before = engine.job("j1").unwrap();

    server.update_job("j1", |job| job.state = JobState::Error);
    engine.refresh().await.unwrap();

    let after = engine.job("j1").unwrap();
    assert!(after.same(&before));
    assert_eq!(before.snapshot().state, JobState::Error);
    assert_eq!(engine.rows()[0].hint, PresentationHint::Error);
}

#[tokio::test]
async fn test_removed_job_drops_row() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Waiting);
    server.add_job("j2", "mail", JobState::Done);
    let mut engine = engine(&server);
    engine.refresh().await.unwrap();

    server.remove_job("j1");
    engine.refresh().await.unwrap();

    let names: Vec<_> = engine.list_jobs().into_iter().map(|job| job.name).collect();
    assert_eq!(names, vec!["mail"]);
    assert!(engine.job("j1").is_none());
}

#[tokio::test]
async fn test_sort_order_follows_key() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "zeta", JobState::Waiting);
    server.add_job("j2", "alpha", JobState::Waiting);
    server.update_job("j1", |job| job.archive_part_size = 1024);
    server.update_job("j2", |job| job.archive_part_size = 4096);
    let mut engine = engine(&server);
    engine.refresh().await.unwrap();

    let names = |engine: &SyncEngine| -> Vec<String> {
        engine.list_jobs().into_iter().map(|job| job.name).collect()
    };
    assert_eq!(names(&engine), vec!["alpha", "zeta"]);

    engine.set_sort(SortKey::PartSize);
    assert_eq!(names(&engine), vec!["zeta", "alpha"]);
}

#[tokio::test]
async fn test_selected_job_detail() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Waiting);
    server.set_detail(
        "j1",
        &[
            ("totalEntryCount", "100"),
            ("doneCount", "40"),
            ("skippedEntryCount", "10"),
            ("errorEntryCount", "5"),
        ],
    );
    let mut engine = engine(&server);
    engine.refresh().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = engine.subscribe_job_state_changed(move |notification| {
        let Notification::JobStateChanged { job, .. } = notification;
        sink.lock().unwrap().push(job.uuid.clone());
    });

    assert!(engine.select_job(Some("j1".to_string())).await);
    assert!(!engine.select_job(Some("j1".to_string())).await);

    let detail = engine.selected_detail().unwrap();
    assert_eq!(detail.entries_progress(), 55.0);
    assert_eq!(*seen.lock().unwrap(), vec!["j1".to_string()]);

    assert!(engine.unsubscribe(id));
    engine.refresh().await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_state_loss_is_fatal() {
    let server = Arc::new(SimulatedServer::new());
    server.set_run_state(ServerRunState::Suspended);
    let config = PollerConfig {
        run_state_failure_threshold: 5,
        ..PollerConfig::default()
    };
    let mut engine = SyncEngine::new(server.clone(), config, SortKey::Name);
    engine.refresh().await.unwrap();

    server.set_offline(true);
    for _ in 0..5 {
        engine.refresh().await.unwrap();
    }
    match engine.refresh().await {
        Err(PollError::RunStateLost { failures, .. }) => assert_eq!(failures, 6),
        other => panic!("expected RunStateLost, got {:?}", other),
    }

    assert_eq!(engine.current_server_run_state(), ServerRunState::Suspended);
    assert!(engine.fatal_error().unwrap().contains("6 consecutive failures"));
}

#[tokio::test]
async fn test_recovered_run_state_resets_failures() {
    let server = Arc::new(SimulatedServer::new());
    let config = PollerConfig {
        run_state_failure_threshold: 2,
        ..PollerConfig::default()
    };
    let mut engine = SyncEngine::new(server.clone(), config, SortKey::Name);

    server.set_offline(true);
    engine.refresh().await.unwrap();
    engine.refresh().await.unwrap();
    server.set_offline(false);
    engine.refresh().await.unwrap();
    server.set_offline(true);
    engine.refresh().await.unwrap();
    engine.refresh().await.unwrap();

    assert!(engine.refresh().await.is_err());
}

#[tokio::test]
async fn test_background_polling_follows_running_job() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Running);
    let config = PollerConfig {
        interval: Duration::from_millis(10),
        job_list_every: 1,
        run_state_failure_threshold: 5,
    };
    let mut engine = SyncEngine::new(server.clone(), config, SortKey::Name);
    engine.refresh().await.unwrap();
    engine.select_job(Some("j1".to_string())).await;
    engine.start().unwrap();

    let done = timeout(Duration::from_secs(5), async {
        while let Some(event) = engine.next_event().await {
            engine.apply(event);
            if engine.list_jobs()[0].state == JobState::Done {
                return true;
            }
        }
        false
    })
    .await;

    assert_eq!(done.ok(), Some(true), "job never finished");
    assert!(engine.fatal_error().is_none());
    engine.stop().await;
}
