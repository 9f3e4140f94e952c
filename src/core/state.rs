//! State shared between the poller and its consumers.

use std::sync::Mutex;

use super::lock;
use super::models::{JobDetail, ScheduleEntry, ServerRunState};
use super::registry::{JobHandle, JobRegistry};

/// Everything the poller writes and the foreground reads.
///
/// Each piece sits behind its own lock; none is held across a server call.
#[derive(Debug, Default)]
pub struct SyncState {
    registry: JobRegistry,
    run_state: Mutex<ServerRunState>,
    selected: Mutex<Option<String>>,
    detail: Mutex<Option<JobDetail>>,
    schedules: Mutex<Vec<ScheduleEntry>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn run_state(&self) -> ServerRunState {
        *lock(&self.run_state)
    }

    /// Store a new run state, returning whether it changed.
    pub fn set_run_state(&self, state: ServerRunState) -> bool {
        let mut current = lock(&self.run_state);
        let changed = *current != state;
        *current = state;
        changed
    }

    pub fn selected(&self) -> Option<String> {
        lock(&self.selected).clone()
    }

    pub fn selected_job(&self) -> Option<JobHandle> {
        self.selected().and_then(|uuid| self.registry.get(&uuid))
    }

    /// Change the selection. Detail and schedules of the previous selection
    /// are discarded. Returns whether the selection changed.
    pub fn select(&self, uuid: Option<String>) -> bool {
        let mut selected = lock(&self.selected);
        if *selected == uuid {
            return false;
        }
        *selected = uuid;
        *lock(&self.detail) = None;
        lock(&self.schedules).clear();
        true
    }

    pub fn detail(&self) -> Option<JobDetail> {
        lock(&self.detail).clone()
    }

    /// Store detail for the selected job; detail for any other job is stale
    /// and dropped.
    pub fn set_detail(&self, detail: JobDetail) -> bool {
        let selected = lock(&self.selected);
        if selected.as_deref() != Some(detail.uuid.as_str()) {
            return false;
        }
        *lock(&self.detail) = Some(detail);
        true
    }

    pub fn schedules(&self) -> Vec<ScheduleEntry> {
        lock(&self.schedules).clone()
    }

    /// Store the schedule list of `uuid` if it is still selected.
    pub fn set_schedules(&self, uuid: &str, schedules: Vec<ScheduleEntry>) -> bool {
        let selected = lock(&self.selected);
        if selected.as_deref() != Some(uuid) {
            return false;
        }
        *lock(&self.schedules) = schedules;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(uuid: &str) -> JobDetail {
        JobDetail {
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn detail_for_unselected_job_is_dropped() {
        let state = SyncState::new();
        state.select(Some("a".to_string()));

        assert!(!state.set_detail(detail("b")));
        assert!(state.detail().is_none());
        assert!(state.set_detail(detail("a")));
        assert_eq!(state.detail().unwrap().uuid, "a");
    }

    #[test]
    fn changing_selection_clears_detail_and_schedules() {
        let state = SyncState::new();
        state.select(Some("a".to_string()));
        state.set_detail(detail("a"));
        state.set_schedules(
            "a",
            vec![ScheduleEntry {
                uuid: "s".to_string(),
                year: None,
                month: None,
                day: None,
                week_days: None,
                hour: None,
                minute: None,
                archive_type: Default::default(),
            }],
        );

        assert!(!state.select(Some("a".to_string())));
        assert_eq!(state.schedules().len(), 1);

        assert!(state.select(None));
        assert!(state.detail().is_none());
        assert!(state.schedules().is_empty());
        assert!(!state.set_schedules("a", Vec::new()));
    }

    #[test]
    fn run_state_change_detection() {
        let state = SyncState::new();
        assert_eq!(state.run_state(), ServerRunState::Running);
        assert!(!state.set_run_state(ServerRunState::Running));
        assert!(state.set_run_state(ServerRunState::Suspended));
    }
}
