use crate::error::AppError;
use crate::models::EventRecord;
use crate::scanner::ScanOutcome;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Refreshing,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSettings {
    pub sessions_dir: PathBuf,
    pub refresh_interval: Duration,
    pub poll_interval: Duration,
    pub warn_threshold: f64,
    pub color: bool,
}

/// What the dashboard last received from the scanner. The record is
/// re-evaluated against the clock on every draw.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    pub latest: Option<(EventRecord, PathBuf)>,
    pub last_refresh: Option<DateTime<Local>>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub loop_state: LoopState,
    pub status: String,
    pub view: DashboardView,
    pub settings: LiveSettings,
}

impl AppState {
    pub fn new(settings: LiveSettings) -> Self {
        Self {
            loop_state: LoopState::Running,
            status: "ready".into(),
            view: DashboardView::default(),
            settings,
        }
    }

    pub fn is_running(&self) -> bool {
        self.loop_state != LoopState::Stopped
    }

    pub fn stop(&mut self) {
        self.loop_state = LoopState::Stopped;
    }

    pub fn begin_refresh(&mut self) {
        if self.is_running() {
            self.loop_state = LoopState::Refreshing;
            self.status = "refreshing...".into();
        }
    }

    /// Any scan result, including an error, leaves the loop running. Only a
    /// successful scan moves `last_refresh`.
    pub fn finish_refresh(&mut self, result: Result<ScanOutcome, AppError>, at: DateTime<Local>) {
        match result {
            Ok(ScanOutcome::Found { record, path }) => {
                self.view.latest = Some((record, path));
                self.view.last_refresh = Some(at);
                self.status = "ok".into();
            }
            Ok(ScanOutcome::NotFound) => {
                self.view.latest = None;
                self.view.last_refresh = Some(at);
                self.status = "no data".into();
            }
            Err(err) => {
                self.view.latest = None;
                self.status = format!("refresh failed: {err}");
            }
        }
        if self.loop_state == LoopState::Refreshing {
            self.loop_state = LoopState::Running;
        }
    }
}
