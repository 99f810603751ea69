use crate::models::{reset_time, EventRecord, RateLimitWindow, WindowKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Display-ready state of one rate-limit window at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStatus {
    pub kind: WindowKind,
    pub label: String,
    pub used_percent: f64,
    pub window_minutes: u64,
    pub reset_at: DateTime<Utc>,
    pub outdated: bool,
    /// Share of the window already elapsed, in `[0, 1]`.
    pub elapsed_fraction: f64,
    /// `used_percent / 100`, or `None` once the window has reset.
    pub usage_fraction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub record: EventRecord,
    pub evaluated_at: DateTime<Utc>,
    pub primary: Option<WindowStatus>,
    pub secondary: Option<WindowStatus>,
}

impl Snapshot {
    pub fn windows(&self) -> impl Iterator<Item = &WindowStatus> {
        self.primary.iter().chain(self.secondary.iter())
    }
}

pub fn evaluate(record: &EventRecord, now: DateTime<Utc>) -> Snapshot {
    Snapshot {
        record: record.clone(),
        evaluated_at: now,
        primary: record.primary.as_ref().map(|w| evaluate_window(record, w, now)),
        secondary: record
            .secondary
            .as_ref()
            .map(|w| evaluate_window(record, w, now)),
    }
}

fn evaluate_window(
    record: &EventRecord,
    window: &RateLimitWindow,
    now: DateTime<Utc>,
) -> WindowStatus {
    let reset_at = reset_time(record, window);
    let outdated = now >= reset_at;

    let elapsed_fraction = if outdated {
        1.0
    } else {
        let window_secs = window.window_minutes as f64 * 60.0;
        if window_secs <= 0.0 {
            0.0
        } else {
            let remaining = (reset_at - now).num_milliseconds() as f64 / 1000.0;
            (1.0 - remaining / window_secs).clamp(0.0, 1.0)
        }
    };

    WindowStatus {
        kind: window.kind,
        label: window.label(),
        used_percent: window.used_percent,
        window_minutes: window.window_minutes,
        reset_at,
        outdated,
        elapsed_fraction,
        usage_fraction: (!outdated).then_some(window.used_percent / 100.0),
    }
}
