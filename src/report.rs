use crate::error::AppError;
use crate::models::TokenUsage;
use crate::scanner::ScanOutcome;
use crate::snapshot::{evaluate, Snapshot, WindowStatus};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt::{Display, Write};
use std::path::{Path, PathBuf};

pub const NOT_FOUND_MESSAGE: &str = "No token_count events found in session files.";
const RESET_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(input: &str) -> Result<Self, AppError> {
        if input.eq_ignore_ascii_case("text") {
            Ok(OutputFormat::Text)
        } else if input.eq_ignore_ascii_case("json") {
            Ok(OutputFormat::Json)
        } else {
            Err(AppError::Config(
                "Unsupported output format. Use text or json".into(),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    sessions_dir: &'a Path,
    source: Option<&'a Path>,
    snapshot: Option<Snapshot>,
}

pub fn format_token_usage(usage: &TokenUsage) -> String {
    let mut out = format!(
        "input {}, cached {}, output {}, reasoning {}, subtotal {}",
        usage.input_tokens,
        usage.cached_input_tokens,
        usage.output_tokens,
        usage.reasoning_output_tokens,
        usage.total()
    );
    if !usage.is_consistent() {
        let _ = write!(out, " (sum {})", usage.component_sum());
    }
    out
}

pub fn format_window<Tz: TimeZone>(status: &WindowStatus, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let reset = status.reset_at.with_timezone(tz).format(RESET_FORMAT);
    if status.outdated {
        format!(
            "{} limit: used N/A (was {:.1}%), reset: {} [OUTDATED]",
            status.label, status.used_percent, reset
        )
    } else {
        format!(
            "{} limit: used {:.1}%, reset: {}",
            status.label, status.used_percent, reset
        )
    }
}

/// Multi-line summary of one snapshot with reset times rendered in `tz`.
pub fn render_summary<Tz: TimeZone>(snapshot: &Snapshot, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let record = &snapshot.record;
    let mut lines = vec![
        format!("total: {}", format_token_usage(&record.total)),
        format!("last:  {}", format_token_usage(&record.last)),
    ];
    if let Some(window) = record.context_window {
        lines.push(format!("context window: {window}"));
    }
    if snapshot.primary.is_none() && snapshot.secondary.is_none() {
        lines.push("rate limits: N/A".into());
    }
    lines.extend(snapshot.windows().map(|w| format_window(w, tz)));
    lines.join("\n")
}

pub fn render_report<Tz: TimeZone>(
    sessions_dir: &Path,
    outcome: &ScanOutcome,
    now: DateTime<Utc>,
    format: OutputFormat,
    tz: &Tz,
) -> Result<String, AppError>
where
    Tz::Offset: Display,
{
    let (source, snapshot): (Option<&PathBuf>, Option<Snapshot>) = match outcome {
        ScanOutcome::Found { record, path } => (Some(path), Some(evaluate(record, now))),
        ScanOutcome::NotFound => (None, None),
    };

    match format {
        OutputFormat::Json => {
            let report = JsonReport {
                sessions_dir,
                source: source.map(PathBuf::as_path),
                snapshot,
            };
            Ok(serde_json::to_string_pretty(&report)?)
        }
        OutputFormat::Text => {
            let mut out = format!("Using input folder: {}\n", sessions_dir.display());
            match (source, snapshot) {
                (Some(path), Some(snapshot)) => {
                    let _ = writeln!(out, "Found latest token_count event in: {}", path.display());
                    out.push_str(&render_summary(&snapshot, tz));
                }
                _ => out.push_str(NOT_FOUND_MESSAGE),
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_line, EventRecord, LineOutcome};
    use chrono::{Duration, TimeZone};

    const SAMPLE: &str = r#"{"timestamp":"2025-09-27T10:00:00Z","type":"event_msg","payload":{"type":"token_count","info":{"total_token_usage":{"input_tokens":5000,"cached_input_tokens":100,"output_tokens":100,"reasoning_output_tokens":14,"total_tokens":5214},"last_token_usage":{"input_tokens":10,"cached_input_tokens":0,"output_tokens":5,"reasoning_output_tokens":0,"total_tokens":15}},"rate_limits":{"primary":{"used_percent":0.0,"window_minutes":300,"resets_in_seconds":17940},"secondary":{"used_percent":22.0,"window_minutes":10080,"resets_in_seconds":351406}}}}"#;

    fn sample() -> EventRecord {
        match parse_line(SAMPLE) {
            LineOutcome::Event(record) => record,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn summary_at_record_time_reports_both_windows_current() {
        let record = sample();
        let snapshot = evaluate(&record, record.timestamp);
        let text = render_summary(&snapshot, &Utc);

        assert_eq!(
            text,
            "total: input 5000, cached 100, output 100, reasoning 14, subtotal 5214\n\
             last:  input 10, cached 0, output 5, reasoning 0, subtotal 15\n\
             5h limit: used 0.0%, reset: 2025-09-27 14:59:00\n\
             weekly limit: used 22.0%, reset: 2025-10-01 11:36:46"
        );
        assert!(!text.contains("[OUTDATED]"));
    }

    #[test]
    fn summary_marks_reset_windows_outdated_without_percentage() {
        let record = sample();
        let snapshot = evaluate(&record, record.timestamp + Duration::hours(6));
        let text = render_summary(&snapshot, &Utc);

        assert!(text.contains(
            "5h limit: used N/A (was 0.0%), reset: 2025-09-27 14:59:00 [OUTDATED]"
        ));
        assert!(text.contains("weekly limit: used 22.0%, reset: 2025-10-01 11:36:46"));
    }

    #[test]
    fn reset_times_follow_requested_timezone() {
        let record = sample();
        let snapshot = evaluate(&record, record.timestamp);
        let plus_two = chrono::FixedOffset::east_opt(2 * 3600).expect("offset");
        let text = render_summary(&snapshot, &plus_two);
        assert!(text.contains("5h limit: used 0.0%, reset: 2025-09-27 16:59:00"));
    }

    #[test]
    fn inconsistent_totals_show_the_component_sum() {
        let usage = TokenUsage {
            input_tokens: 1,
            cached_input_tokens: 2,
            output_tokens: 3,
            reasoning_output_tokens: 4,
            total_tokens: Some(11),
        };
        assert_eq!(
            format_token_usage(&usage),
            "input 1, cached 2, output 3, reasoning 4, subtotal 11 (sum 10)"
        );
    }

    #[test]
    fn text_report_for_missing_data_is_not_an_error() {
        let now = Utc.with_ymd_and_hms(2025, 9, 27, 10, 0, 0).unwrap();
        let out = render_report(
            Path::new("/tmp/sessions"),
            &ScanOutcome::NotFound,
            now,
            OutputFormat::Text,
            &Utc,
        )
        .expect("render");
        assert_eq!(
            out,
            format!("Using input folder: /tmp/sessions\n{NOT_FOUND_MESSAGE}")
        );
    }

    #[test]
    fn text_report_names_the_source_file() {
        let record = sample();
        let outcome = ScanOutcome::Found {
            record: record.clone(),
            path: PathBuf::from("/tmp/sessions/2025/09/27/rollout-a.jsonl"),
        };
        let out = render_report(
            Path::new("/tmp/sessions"),
            &outcome,
            record.timestamp,
            OutputFormat::Text,
            &Utc,
        )
        .expect("render");
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("Using input folder: /tmp/sessions"));
        assert_eq!(
            lines.next(),
            Some("Found latest token_count event in: /tmp/sessions/2025/09/27/rollout-a.jsonl")
        );
        assert!(out.contains("subtotal 5214"));
    }

    #[test]
    fn json_report_carries_outdated_flags() {
        let record = sample();
        let outcome = ScanOutcome::Found {
            record: record.clone(),
            path: PathBuf::from("/s/rollout-a.jsonl"),
        };
        let out = render_report(
            Path::new("/s"),
            &outcome,
            record.timestamp + Duration::hours(6),
            OutputFormat::Json,
            &Utc,
        )
        .expect("render");
        let parsed: serde_json::Value = serde_json::from_str(&out).expect("valid json");
        assert_eq!(parsed["source"], "/s/rollout-a.jsonl");
        assert_eq!(parsed["snapshot"]["primary"]["outdated"], true);
        assert!(parsed["snapshot"]["primary"]["usage_fraction"].is_null());
        assert_eq!(parsed["snapshot"]["secondary"]["outdated"], false);
        assert_eq!(parsed["snapshot"]["record"]["total"]["total_tokens"], 5214);
    }

    #[test]
    fn output_format_parse_rejects_unknown() {
        assert_eq!(OutputFormat::parse("JSON").expect("json"), OutputFormat::Json);
        let err = OutputFormat::parse("csv").expect_err("expected error");
        assert!(err.to_string().contains("Unsupported output format"));
    }
}
