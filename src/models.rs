use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default window lengths used when a record omits `window_minutes`.
pub const PRIMARY_WINDOW_MINUTES: u64 = 5 * 60;
pub const SECONDARY_WINDOW_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cached_input_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning_output_tokens: u64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn component_sum(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cached_input_tokens)
            .saturating_add(self.output_tokens)
            .saturating_add(self.reasoning_output_tokens)
    }

    /// Supplied total when the log carries one, otherwise the component sum.
    pub fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| self.component_sum())
    }

    pub fn is_consistent(&self) -> bool {
        self.total_tokens
            .map_or(true, |supplied| supplied == self.component_sum())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Primary,
    Secondary,
}

impl WindowKind {
    pub fn default_minutes(self) -> u64 {
        match self {
            WindowKind::Primary => PRIMARY_WINDOW_MINUTES,
            WindowKind::Secondary => SECONDARY_WINDOW_MINUTES,
        }
    }

    pub fn as_key(self) -> &'static str {
        match self {
            WindowKind::Primary => "primary",
            WindowKind::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub kind: WindowKind,
    pub used_percent: f64,
    pub window_minutes: u64,
    /// Seconds until reset, relative to the owning record's timestamp.
    pub resets_in_seconds: i64,
}

impl RateLimitWindow {
    /// Human label for the window length: `5h`, `weekly`, or a compact duration.
    pub fn label(&self) -> String {
        match self.window_minutes {
            0 => self.kind.as_key().to_string(),
            PRIMARY_WINDOW_MINUTES => "5h".into(),
            SECONDARY_WINDOW_MINUTES => "weekly".into(),
            m if m % (24 * 60) == 0 => format!("{}d", m / (24 * 60)),
            m if m % 60 == 0 => format!("{}h", m / 60),
            m => format!("{m}m"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub total: TokenUsage,
    pub last: TokenUsage,
    pub context_window: Option<u64>,
    pub primary: Option<RateLimitWindow>,
    pub secondary: Option<RateLimitWindow>,
}

/// Classification of a single log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Not valid JSON.
    Malformed,
    /// Valid JSON but not a usable token-count event.
    Ignored,
    Event(EventRecord),
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    total_token_usage: TokenUsage,
    last_token_usage: TokenUsage,
    #[serde(default)]
    model_context_window: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawWindow {
    #[serde(default, deserialize_with = "null_as_default")]
    used_percent: f64,
    #[serde(default)]
    window_minutes: Option<u64>,
    #[serde(default)]
    resets_in_seconds: Option<i64>,
    #[serde(default)]
    resets_at: Option<i64>,
}

/// Explicit `null` reads the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// RFC 3339, or ISO 8601 without an offset, which is taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(stamped) = DateTime::parse_from_rfc3339(raw) {
        return Some(stamped.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn parse_line(line: &str) -> LineOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineOutcome::Ignored;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return LineOutcome::Malformed,
    };
    match event_from_value(&value) {
        Some(record) => LineOutcome::Event(record),
        None => LineOutcome::Ignored,
    }
}

fn event_from_value(value: &Value) -> Option<EventRecord> {
    if value.get("type").and_then(Value::as_str) != Some("event_msg") {
        return None;
    }
    let payload = value.get("payload")?;
    if payload.get("type").and_then(Value::as_str) != Some("token_count") {
        return None;
    }

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)?;

    let info: RawInfo = serde_json::from_value(payload.get("info")?.clone()).ok()?;

    let limits = payload.get("rate_limits");
    let window = |kind: WindowKind| {
        limits
            .and_then(|l| l.get(kind.as_key()))
            .and_then(|raw| window_from_value(kind, raw, timestamp))
    };

    Some(EventRecord {
        timestamp,
        total: info.total_token_usage,
        last: info.last_token_usage,
        context_window: info.model_context_window,
        primary: window(WindowKind::Primary),
        secondary: window(WindowKind::Secondary),
    })
}

fn window_from_value(
    kind: WindowKind,
    raw: &Value,
    timestamp: DateTime<Utc>,
) -> Option<RateLimitWindow> {
    if raw.is_null() {
        return None;
    }
    let parsed: RawWindow = serde_json::from_value(raw.clone()).ok()?;
    let resets_in_seconds = match (parsed.resets_in_seconds, parsed.resets_at) {
        (Some(secs), _) => secs,
        (None, Some(epoch)) => epoch.saturating_sub(timestamp.timestamp()),
        (None, None) => 0,
    };
    Some(RateLimitWindow {
        kind,
        used_percent: parsed.used_percent,
        window_minutes: parsed.window_minutes.unwrap_or_else(|| kind.default_minutes()),
        resets_in_seconds,
    })
}

/// Absolute reset time of a window belonging to `record`.
pub fn reset_time(record: &EventRecord, window: &RateLimitWindow) -> DateTime<Utc> {
    Duration::try_seconds(window.resets_in_seconds)
        .and_then(|offset| record.timestamp.checked_add_signed(offset))
        .unwrap_or(if window.resets_in_seconds < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}
