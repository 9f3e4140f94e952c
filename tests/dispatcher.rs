use barctl::channel::{ChannelError, SimulatedServer};
use barctl::core::{
    ArchiveType, DispatchError, Dispatched, JobState, PauseModes, PollError, PollerConfig,
    ServerRunState, SortKey, SyncEngine,
};
use std::sync::Arc;

async fn setup(server: &Arc<SimulatedServer>, select: Option<&str>) -> SyncEngine {
    let mut engine = SyncEngine::new(server.clone(), PollerConfig::default(), SortKey::Name);
    engine.refresh().await.unwrap();
    if let Some(uuid) = select {
        engine.select_job(Some(uuid.to_string())).await;
    }
    server.clear_commands();
    engine
}

#[tokio::test]
async fn test_suspend_running_server() {
    let server = Arc::new(SimulatedServer::new());
    let mut engine = setup(&server, None).await;

    let target = engine.dispatcher().suspend_or_continue().await.unwrap();
    engine.pump();

    assert_eq!(target, ServerRunState::Suspended);
    assert_eq!(server.count("SUSPEND"), 1);
    assert_eq!(server.count("CONTINUE"), 0);
    assert_eq!(engine.current_server_run_state(), ServerRunState::Suspended);
}

#[tokio::test]
async fn test_continue_paused_server() {
    let server = Arc::new(SimulatedServer::new());
    server.set_run_state(ServerRunState::Paused {
        remaining_secs: 600,
    });
    let engine = setup(&server, None).await;
    assert!(matches!(
        engine.current_server_run_state(),
        ServerRunState::Paused { .. }
    ));

    let target = engine.dispatcher().suspend_or_continue().await.unwrap();

    assert_eq!(target, ServerRunState::Running);
    assert_eq!(server.count("CONTINUE"), 1);
    assert_eq!(engine.current_server_run_state(), ServerRunState::Running);
}

#[tokio::test]
async fn test_stale_run_state_converges() {
    let server = Arc::new(SimulatedServer::new());
    let mut engine = setup(&server, None).await;

    // Suspended behind the poller's back: the toggle acts on the stale
    // "running" state.
    server.set_run_state(ServerRunState::Suspended);
    let target = engine.dispatcher().suspend_or_continue().await.unwrap();
    assert_eq!(target, ServerRunState::Suspended);
    assert_eq!(server.count("SUSPEND"), 1);

    engine.refresh().await.unwrap();
    assert_eq!(engine.current_server_run_state(), server.run_state());

    engine.dispatcher().suspend_or_continue().await.unwrap();
    assert_eq!(server.count("CONTINUE"), 1);
    assert_eq!(engine.current_server_run_state(), ServerRunState::Running);
}

#[tokio::test]
async fn test_pause_modes() {
    let server = Arc::new(SimulatedServer::new());
    let engine = setup(&server, None).await;

    let skipped = engine
        .dispatcher()
        .pause(60, PauseModes::default())
        .await
        .unwrap();
    assert_eq!(skipped, Dispatched::Skipped);
    assert_eq!(server.count("PAUSE"), 0);

    let modes = PauseModes {
        create: true,
        restore: true,
        ..Default::default()
    };
    engine.dispatcher().pause(60, modes).await.unwrap();

    assert_eq!(server.commands()[0], "PAUSE time=60 modeMask=CREATE,RESTORE");
    assert!(matches!(
        engine.current_server_run_state(),
        ServerRunState::Paused { .. }
    ));
}

#[tokio::test]
async fn test_start_asks_for_password() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Waiting);
    server.update_job("j1", |job| job.crypt_password_mode = "ask".to_string());
    let mut engine = setup(&server, Some("j1")).await;

    let err = engine
        .dispatcher()
        .start(ArchiveType::Full, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::PasswordRequired { ref job } if job == "home"));
    assert_eq!(server.count("JOB_START"), 0);

    engine
        .dispatcher()
        .start_with_password(ArchiveType::Full, false, false, "secret")
        .await
        .unwrap();
    engine.pump();

    assert_eq!(server.crypt_password("j1").as_deref(), Some("secret"));
    let job = engine.job_by_name("home").unwrap();
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.archive_type, ArchiveType::Full);
    assert_eq!(engine.list_jobs()[0].state, JobState::Running);
}

#[tokio::test]
async fn test_start_running_job_fails() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Running);
    let engine = setup(&server, Some("j1")).await;

    let err = engine
        .dispatcher()
        .start(ArchiveType::Normal, false, false)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "cannot start job 'home': job already running: home");
}

#[tokio::test]
async fn test_dry_run_start() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Done);
    let engine = setup(&server, Some("j1")).await;

    engine
        .dispatcher()
        .start(ArchiveType::Incremental, false, true)
        .await
        .unwrap();

    assert_eq!(
        server.commands()[0],
        "JOB_START jobUUID=j1 archiveType=incremental noStorage=no dryRun=yes"
    );
    assert_eq!(
        engine.job_by_name("home").unwrap().state,
        JobState::DryRunning
    );
}

#[tokio::test]
async fn test_abort_and_reset() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Running);
    let engine = setup(&server, Some("j1")).await;
    assert!(engine.dispatcher().requires_confirmation());

    engine.dispatcher().abort().await.unwrap();
    assert_eq!(engine.job_by_name("home").unwrap().state, JobState::Aborted);
    assert!(!engine.dispatcher().requires_confirmation());

    engine.dispatcher().reset().await.unwrap();
    assert_eq!(engine.job_by_name("home").unwrap().state, JobState::None);
    assert_eq!(server.count("JOB_ABORT"), 1);
    assert_eq!(server.count("JOB_RESET"), 1);
}

#[tokio::test]
async fn test_volume_request_cycle() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Running);
    let engine = setup(&server, Some("j1")).await;

    engine.dispatcher().unload_volume().await.unwrap();
    assert_eq!(
        engine.job_by_name("home").unwrap().state,
        JobState::RequestVolume
    );

    let err = engine.dispatcher().load_volume(5).await.unwrap_err();
    assert!(matches!(err, DispatchError::Command { action, .. } if action == "load volume for"));

    engine.dispatcher().load_volume(1).await.unwrap();
    assert_eq!(engine.job_by_name("home").unwrap().state, JobState::Running);
}

#[tokio::test]
async fn test_trigger_schedule() {
    let server = Arc::new(SimulatedServer::demo());
    let mut engine = SyncEngine::new(server.clone(), PollerConfig::default(), SortKey::Name);
    engine.refresh().await.unwrap();
    let home = engine.job_by_name("home").unwrap();
    engine.select_job(Some(home.uuid.clone())).await;

    let schedules = engine.schedule_entries();
    assert_eq!(schedules.len(), 2);
    let full = schedules
        .iter()
        .find(|s| s.archive_type == ArchiveType::Full)
        .unwrap();

    engine
        .dispatcher()
        .trigger_schedule(&full.uuid)
        .await
        .unwrap();

    let job = engine.job_by_name("home").unwrap();
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.archive_type, ArchiveType::Full);
}

#[tokio::test]
async fn test_actions_need_selection() {
    let server = Arc::new(SimulatedServer::new());
    server.add_job("j1", "home", JobState::Waiting);
    let engine = setup(&server, None).await;

    assert!(matches!(
        engine.dispatcher().abort().await,
        Err(DispatchError::NoJobSelected)
    ));
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn test_run_state_loss_during_command_refresh_is_fatal() {
    let server = Arc::new(SimulatedServer::new());
    let mut engine = setup(&server, None).await;

    server.fail_next(
        "STATUS",
        6,
        ChannelError::Connection("connection refused".to_string()),
    );
    for _ in 0..5 {
        engine.refresh().await.unwrap();
    }
    assert!(engine.fatal_error().is_none());

    // The sixth failure happens in the refresh that follows the pause.
    let result = engine
        .dispatcher()
        .pause(10, PauseModes::all())
        .await
        .unwrap();
    assert_eq!(result, Dispatched::Sent);
    engine.pump();

    let fatal = engine.fatal_error().unwrap().to_string();
    assert!(fatal.contains("6 consecutive failures"));

    // STATUS would succeed again, but polling stays stopped.
    let before = server.count("STATUS");
    assert!(matches!(
        engine.refresh().await,
        Err(PollError::Terminated)
    ));
    assert_eq!(server.count("STATUS"), before);
    assert_eq!(engine.fatal_error(), Some(fatal.as_str()));
}

#[tokio::test]
async fn test_schedule_uuid_must_be_one_token() {
    let server = Arc::new(SimulatedServer::demo());
    let mut engine = SyncEngine::new(server.clone(), PollerConfig::default(), SortKey::Name);
    engine.refresh().await.unwrap();
    let home = engine.job_by_name("home").unwrap();
    engine.select_job(Some(home.uuid)).await;
    server.clear_commands();

    for bad in ["x jobUUID=other", "s1\nJOB_ABORT jobUUID=j1", ""] {
        let err = engine.dispatcher().trigger_schedule(bad).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidArgument { name: "schedule UUID", .. }
        ));
    }

    let err = engine
        .dispatcher()
        .trigger_schedule("a b")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid schedule UUID 'a b'");
    assert!(server.commands().is_empty());
}
