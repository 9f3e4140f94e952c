//! TUI application state and logic.

use crate::core::{
    ArchiveType, DispatchError, Dispatched, JobSnapshot, PauseModes, ScheduleEntry, SyncEngine,
};

/// Modal state on top of the job table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Normal,
    /// Choosing the archive type to start with.
    StartMenu { selected: usize },
    Password {
        archive_type: ArchiveType,
        input: String,
    },
    ConfirmAbort,
    Pause { input: String },
    Volume { input: String },
    Schedules { selected: usize },
}

impl Mode {
    /// Whether key presses are text input.
    pub fn accepts_text(&self) -> bool {
        matches!(
            self,
            Mode::Password { .. } | Mode::Pause { .. } | Mode::Volume { .. }
        )
    }
}

/// Actions that can be triggered by user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Up,
    Down,
    Select,
    Back,
    Refresh,
    Start,
    Abort,
    Pause,
    Toggle,
    Reset,
    LoadVolume,
    UnloadVolume,
    Schedules,
    CycleSort,
    Yes,
    Char(char),
    Backspace,
}

pub struct TuiApp {
    pub engine: SyncEngine,
    pub server: String,
    pub mode: Mode,
    pub running: bool,
    pub status: Option<String>,
    pub error: Option<String>,
    /// Row index of the selected job.
    pub selected: usize,
}

impl TuiApp {
    pub fn new(engine: SyncEngine, server: String) -> Self {
        Self {
            engine,
            server,
            mode: Mode::Normal,
            running: true,
            status: None,
            error: None,
            selected: 0,
        }
    }

    /// Apply pending poll results and keep the cursor on the selected job.
    pub async fn sync(&mut self) {
        self.engine.pump();

        let len = self.engine.rows().len();
        if len == 0 {
            if self.engine.selected().is_some() {
                self.engine.select_job(None).await;
            }
            return;
        }

        let position = self.engine.selected().and_then(|uuid| {
            self.engine
                .rows()
                .iter()
                .position(|row| row.snapshot.uuid == uuid)
        });
        match position {
            Some(index) => self.selected = index,
            None => {
                self.selected = self.selected.min(len - 1);
                self.select_current().await;
            }
        }
    }

    pub fn selected_job(&self) -> Option<JobSnapshot> {
        self.engine
            .rows()
            .get(self.selected)
            .map(|row| row.snapshot.clone())
    }

    async fn select_current(&mut self) {
        let uuid = self
            .engine
            .rows()
            .get(self.selected)
            .map(|row| row.snapshot.uuid.clone());
        self.engine.select_job(uuid).await;
    }

    pub async fn handle_action(&mut self, action: Action) {
        if action == Action::Quit {
            self.running = false;
            return;
        }

        match self.mode.clone() {
            Mode::Normal => self.handle_normal(action).await,
            Mode::StartMenu { selected } => self.handle_start_menu(action, selected).await,
            Mode::Password {
                archive_type,
                input,
            } => self.handle_password(action, archive_type, input).await,
            Mode::ConfirmAbort => match action {
                Action::Yes | Action::Select => {
                    self.mode = Mode::Normal;
                    let result = self.engine.dispatcher().abort().await;
                    self.report(result, "Job aborted");
                }
                _ => self.mode = Mode::Normal,
            },
            Mode::Pause { input } => {
                if let Some(input) = self.edit(action, input, |c| c.is_ascii_digit()) {
                    self.mode = Mode::Normal;
                    match input.parse::<u64>() {
                        Ok(seconds) if seconds > 0 => {
                            let result = self
                                .engine
                                .dispatcher()
                                .pause(seconds, PauseModes::all())
                                .await;
                            self.report(result, "Server paused");
                        }
                        _ => self.error = Some("pause needs a number of seconds".to_string()),
                    }
                }
            }
            Mode::Volume { input } => {
                if let Some(input) = self.edit(action, input, |c| c.is_ascii_digit()) {
                    self.mode = Mode::Normal;
                    match input.parse::<u32>() {
                        Ok(number) => {
                            let result = self.engine.dispatcher().load_volume(number).await;
                            self.report(result, "Volume loaded");
                        }
                        Err(_) => self.error = Some("invalid volume number".to_string()),
                    }
                }
            }
            Mode::Schedules { selected } => self.handle_schedules(action, selected).await,
        }
    }

    async fn handle_normal(&mut self, action: Action) {
        match action {
            Action::Up => {
                if self.selected > 0 {
                    self.selected -= 1;
                    self.select_current().await;
                }
            }
            Action::Down => {
                if self.selected + 1 < self.engine.rows().len() {
                    self.selected += 1;
                    self.select_current().await;
                }
            }
            Action::Refresh => {
                if let Err(e) = self.engine.refresh().await {
                    self.error = Some(e.to_string());
                }
            }
            Action::CycleSort => {
                let next = self.engine.sort_key().next();
                self.engine.set_sort(next);
                self.status = Some(format!("Sorted by {}", next));
            }
            Action::Start if self.selected_job().is_some() => {
                self.mode = Mode::StartMenu { selected: 0 };
            }
            Action::Abort if self.selected_job().is_some() => {
                if self.engine.dispatcher().requires_confirmation() {
                    self.mode = Mode::ConfirmAbort;
                } else {
                    let result = self.engine.dispatcher().abort().await;
                    self.report(result, "Job aborted");
                }
            }
            Action::Pause => {
                self.mode = Mode::Pause {
                    input: "60".to_string(),
                };
            }
            Action::Toggle => match self.engine.dispatcher().suspend_or_continue().await {
                Ok(state) => {
                    self.error = None;
                    self.status = Some(format!("Server {}", state.label()));
                }
                Err(e) => self.error = Some(e.to_string()),
            },
            Action::Reset if self.selected_job().is_some() => {
                let result = self.engine.dispatcher().reset().await;
                self.report(result, "Job reset");
            }
            Action::LoadVolume if self.selected_job().is_some() => {
                let requested = self
                    .engine
                    .selected_detail()
                    .map(|d| d.requested_volume_number)
                    .unwrap_or(0);
                self.mode = Mode::Volume {
                    input: requested.to_string(),
                };
            }
            Action::UnloadVolume if self.selected_job().is_some() => {
                let result = self.engine.dispatcher().unload_volume().await;
                self.report(result, "Volume unloaded");
            }
            Action::Schedules if self.selected_job().is_some() => {
                if self.schedules().is_empty() {
                    self.status = Some("No schedules for this job".to_string());
                } else {
                    self.mode = Mode::Schedules { selected: 0 };
                }
            }
            Action::Back => {
                self.error = None;
                self.status = None;
            }
            _ => {}
        }
    }

    async fn handle_start_menu(&mut self, action: Action, selected: usize) {
        match action {
            Action::Up => {
                self.mode = Mode::StartMenu {
                    selected: selected.saturating_sub(1),
                }
            }
            Action::Down => {
                self.mode = Mode::StartMenu {
                    selected: (selected + 1).min(ArchiveType::ALL.len() - 1),
                }
            }
            Action::Select => {
                let archive_type = ArchiveType::ALL[selected.min(ArchiveType::ALL.len() - 1)];
                self.start(archive_type).await;
            }
            Action::Back => self.mode = Mode::Normal,
            _ => {}
        }
    }

    async fn start(&mut self, archive_type: ArchiveType) {
        self.mode = Mode::Normal;
        match self
            .engine
            .dispatcher()
            .start(archive_type, false, false)
            .await
        {
            Err(DispatchError::PasswordRequired { .. }) => {
                self.mode = Mode::Password {
                    archive_type,
                    input: String::new(),
                };
            }
            result => self.report(result, "Job started"),
        }
    }

    async fn handle_password(&mut self, action: Action, archive_type: ArchiveType, input: String) {
        let Some(password) = self.edit(action, input, |c| !c.is_control()) else {
            return;
        };
        self.mode = Mode::Normal;
        let result = self
            .engine
            .dispatcher()
            .start_with_password(archive_type, false, false, &password)
            .await;
        self.report(result, "Job started");
    }

    async fn handle_schedules(&mut self, action: Action, selected: usize) {
        let schedules = self.schedules();
        match action {
            Action::Up => {
                self.mode = Mode::Schedules {
                    selected: selected.saturating_sub(1),
                }
            }
            Action::Down => {
                self.mode = Mode::Schedules {
                    selected: (selected + 1).min(schedules.len().saturating_sub(1)),
                }
            }
            Action::Select => {
                self.mode = Mode::Normal;
                if let Some(schedule) = schedules.get(selected) {
                    let result = self
                        .engine
                        .dispatcher()
                        .trigger_schedule(&schedule.uuid)
                        .await;
                    self.report(result, "Schedule triggered");
                }
            }
            Action::Back => self.mode = Mode::Normal,
            _ => {}
        }
    }

    pub fn schedules(&self) -> Vec<ScheduleEntry> {
        self.engine.schedule_entries()
    }

    /// Feed an action to a text prompt. Returns the text once confirmed;
    /// otherwise updates (or closes) the prompt.
    fn edit(&mut self, action: Action, mut input: String, allowed: fn(char) -> bool) -> Option<String> {
        match action {
            Action::Select => return Some(input),
            Action::Back => {
                self.mode = Mode::Normal;
                return None;
            }
            Action::Char(c) if allowed(c) => input.push(c),
            Action::Backspace => {
                input.pop();
            }
            _ => {}
        }
        self.mode = match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Password { archive_type, .. } => Mode::Password {
                archive_type,
                input,
            },
            Mode::Pause { .. } => Mode::Pause { input },
            Mode::Volume { .. } => Mode::Volume { input },
            other => other,
        };
        None
    }

    fn report(&mut self, result: Result<Dispatched, DispatchError>, done: &str) {
        match result {
            Ok(Dispatched::Sent) => {
                self.error = None;
                self.status = Some(done.to_string());
            }
            Ok(Dispatched::Skipped) => self.status = Some("Nothing to do".to_string()),
            Err(e) => self.error = Some(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SimulatedServer;
    use crate::core::{JobState, PollerConfig, SortKey};
    use std::sync::Arc;

    async fn app(server: &Arc<SimulatedServer>) -> TuiApp {
        let mut engine = SyncEngine::new(server.clone(), PollerConfig::default(), SortKey::Name);
        engine.refresh().await.unwrap();
        let mut app = TuiApp::new(engine, "sim".to_string());
        app.sync().await;
        app
    }

    #[tokio::test]
    async fn first_job_is_selected() {
        let server = Arc::new(SimulatedServer::new());
        server.add_job("b", "beta", JobState::Waiting);
        server.add_job("a", "alpha", JobState::Waiting);

        let app = app(&server).await;

        assert_eq!(app.engine.selected().as_deref(), Some("a"));
        assert!(app.engine.selected_detail().is_some());
    }

    #[tokio::test]
    async fn start_with_ask_mode_prompts_for_password() {
        let server = Arc::new(SimulatedServer::new());
        server.add_job("a", "alpha", JobState::Waiting);
        server.update_job("a", |job| job.crypt_password_mode = "ask".to_string());
        let mut app = app(&server).await;

        app.handle_action(Action::Start).await;
        app.handle_action(Action::Select).await;
        assert!(matches!(app.mode, Mode::Password { .. }));

        for c in "pw".chars() {
            app.handle_action(Action::Char(c)).await;
        }
        app.handle_action(Action::Select).await;

        assert_eq!(app.mode, Mode::Normal);
        assert_eq!(server.crypt_password("a").as_deref(), Some("pw"));
        assert_eq!(server.job("a").unwrap().state, JobState::Running);
        assert!(app.error.is_none());
    }

    #[tokio::test]
    async fn abort_of_running_job_asks_first() {
        let server = Arc::new(SimulatedServer::new());
        server.add_job("a", "alpha", JobState::Running);
        let mut app = app(&server).await;

        app.handle_action(Action::Abort).await;
        assert_eq!(app.mode, Mode::ConfirmAbort);
        assert_eq!(server.count("JOB_ABORT"), 0);

        app.handle_action(Action::Yes).await;
        assert_eq!(server.job("a").unwrap().state, JobState::Aborted);
    }

    #[tokio::test]
    async fn failed_command_shows_error() {
        let server = Arc::new(SimulatedServer::new());
        server.add_job("a", "alpha", JobState::Done);
        let mut app = app(&server).await;

        app.handle_action(Action::Abort).await;

        assert_eq!(
            app.error.as_deref(),
            Some("cannot abort job 'alpha': job not running: alpha")
        );
    }
}
