use chrono::{Local, SecondsFormat, Utc};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_codex-meter")
}

fn run_cmd(home: &TempDir, args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env("CODEX_METER_HOME", home.path())
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("run codex-meter command")
}

fn today_dir(root: &Path) -> PathBuf {
    let today = Local::now().date_naive();
    root.join(today.format("%Y").to_string())
        .join(today.format("%m").to_string())
        .join(today.format("%d").to_string())
}

fn seed_rollout(root: &Path, lines: &[String]) {
    let dir = today_dir(root);
    fs::create_dir_all(&dir).expect("create day dir");
    fs::write(
        dir.join("rollout-2025-09-27T10-00-00-0199.jsonl"),
        lines.join("\n"),
    )
    .expect("write rollout file");
}

fn token_count_line(timestamp: &str) -> String {
    format!(
        r#"{{"timestamp":"{timestamp}","type":"event_msg","payload":{{"type":"token_count","info":{{"total_token_usage":{{"input_tokens":5000,"cached_input_tokens":100,"output_tokens":100,"reasoning_output_tokens":14,"total_tokens":5214}},"last_token_usage":{{"input_tokens":10,"cached_input_tokens":0,"output_tokens":5,"reasoning_output_tokens":0,"total_tokens":15}}}},"rate_limits":{{"primary":{{"used_percent":0.0,"window_minutes":300,"resets_in_seconds":17940}},"secondary":{{"used_percent":22.0,"window_minutes":10080,"resets_in_seconds":351406}}}}}}}}"#
    )
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[test]
fn report_prints_latest_usage_and_limits() {
    let home = TempDir::new().expect("temp home");
    let sessions = TempDir::new().expect("temp sessions");
    seed_rollout(
        sessions.path(),
        &[
            r#"{"timestamp":"2025-09-27T09:59:00Z","type":"session_meta","payload":{}}"#.into(),
            "{truncated".into(),
            token_count_line(&now_stamp()),
        ],
    );

    let root = sessions.path().to_str().expect("utf-8 path");
    let output = run_cmd(&home, &["-i", root]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("Using input folder: {root}")));
    assert!(stdout.contains("Found latest token_count event in:"));
    assert!(stdout.contains(
        "total: input 5000, cached 100, output 100, reasoning 14, subtotal 5214"
    ));
    assert!(stdout.contains("5h limit: used 0.0%, reset:"));
    assert!(stdout.contains("weekly limit: used 22.0%, reset:"));
    assert!(!stdout.contains("[OUTDATED]"));
}

#[test]
fn report_without_events_is_not_an_error() {
    let home = TempDir::new().expect("temp home");
    let sessions = TempDir::new().expect("temp sessions");

    let output = run_cmd(
        &home,
        &["-i", sessions.path().to_str().expect("utf-8 path")],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No token_count events found in session files."));
}

#[test]
fn missing_sessions_dir_reports_no_data() {
    let home = TempDir::new().expect("temp home");
    let missing = home.path().join("does-not-exist");

    let output = run_cmd(&home, &["-i", missing.to_str().expect("utf-8 path")]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No token_count events found"));
}

#[test]
fn unusable_sessions_root_fails() {
    let home = TempDir::new().expect("temp home");
    let file = home.path().join("sessions");
    fs::write(&file, "not a directory").expect("write file");

    let root = file.to_str().expect("utf-8 path");
    let output = run_cmd(&home, &["-i", root]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(root));
}

#[test]
fn json_report_is_valid() {
    let home = TempDir::new().expect("temp home");
    let sessions = TempDir::new().expect("temp sessions");
    seed_rollout(sessions.path(), &[token_count_line(&now_stamp())]);

    let output = run_cmd(
        &home,
        &[
            "-i",
            sessions.path().to_str().expect("utf-8 path"),
            "--format",
            "json",
        ],
    );
    assert!(output.status.success());

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    assert!(parsed["source"]
        .as_str()
        .expect("source path")
        .ends_with(".jsonl"));
    assert_eq!(parsed["snapshot"]["primary"]["outdated"], false);
    assert_eq!(parsed["snapshot"]["secondary"]["used_percent"], 22.0);
}

#[test]
fn unknown_format_is_rejected() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["--format", "csv"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported output format"));
}

#[test]
fn live_mode_requires_a_terminal() {
    let home = TempDir::new().expect("temp home");
    let sessions = TempDir::new().expect("temp sessions");

    let output = run_cmd(
        &home,
        &[
            "-i",
            sessions.path().to_str().expect("utf-8 path"),
            "--live",
        ],
    );
    assert!(!output.status.success());
    // Rejected before any frame is drawn.
    assert!(output.stdout.is_empty());
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("temp home");
    let config = home.path().join("config").join("config.toml");

    assert!(run_cmd(&home, &["init"]).status.success());
    let first = fs::read_to_string(&config).expect("read config after first init");
    assert!(first.contains("lookback_days = 30"));

    assert!(run_cmd(&home, &["init"]).status.success());
    let second = fs::read_to_string(&config).expect("read config after second init");
    assert_eq!(first, second);
}

#[test]
fn config_file_lookback_is_honoured() {
    let home = TempDir::new().expect("temp home");
    let sessions = TempDir::new().expect("temp sessions");
    let old_day = Local::now().date_naive() - chrono::Days::new(5);
    let dir = sessions
        .path()
        .join(old_day.format("%Y").to_string())
        .join(old_day.format("%m").to_string())
        .join(old_day.format("%d").to_string());
    fs::create_dir_all(&dir).expect("create day dir");
    fs::write(dir.join("rollout-old.jsonl"), token_count_line(&now_stamp()))
        .expect("write rollout");

    fs::create_dir_all(home.path().join("config")).expect("config dir");
    fs::write(
        home.path().join("config").join("config.toml"),
        "lookback_days = 2\n",
    )
    .expect("write config");

    let root = sessions.path().to_str().expect("utf-8 path");
    let short = run_cmd(&home, &["-i", root]);
    assert!(String::from_utf8_lossy(&short.stdout).contains("No token_count events found"));

    let long = run_cmd(&home, &["-i", root, "--lookback-days", "7"]);
    assert!(String::from_utf8_lossy(&long.stdout).contains("subtotal 5214"));
}
