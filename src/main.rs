mod config;
mod error;
mod logging;
mod models;
mod report;
mod scanner;
mod snapshot;
mod ui;

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use config::{ensure_initialized, load_config, log_dir, Overrides};
use error::AppError;
use logging::{setup_logging, LogTarget};
use report::{render_report, OutputFormat};
use scanner::LogScanner;
use std::path::PathBuf;
use std::time::Duration;
use ui::app::LiveSettings;
use ui::run::run_live;

#[derive(Debug, Parser)]
#[command(name = "codex-meter")]
#[command(about = "Token usage and rate-limit monitor for Codex session logs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Sessions directory (default: ~/.codex/sessions)
    #[arg(short = 'i', long = "input-folder")]
    input_folder: Option<PathBuf>,

    /// Days to search backwards from today
    #[arg(long)]
    lookback_days: Option<u32>,

    /// Keep a refreshing dashboard open instead of printing once
    #[arg(long)]
    live: bool,

    /// Live refresh interval in seconds
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// Usage percentage at which live bars switch to the warning colour
    #[arg(long, value_name = "PERCENT")]
    warn_threshold: Option<f64>,

    /// One-shot output format: text or json
    #[arg(long, default_value = "text")]
    format: String,

    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write the default config file if none exists
    Init,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            sessions_dir: self.input_folder.clone(),
            lookback_days: self.lookback_days,
            refresh_seconds: self.interval,
            warn_threshold: self.warn_threshold,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    if let Some(Commands::Init) = cli.command {
        let path = ensure_initialized()?;
        println!("Initialized codex-meter config at {}", path.display());
        return Ok(());
    }

    let format = OutputFormat::parse(&cli.format)?;
    let log_target = if cli.live {
        LogTarget::File(log_dir()?)
    } else {
        LogTarget::Stderr
    };
    setup_logging(cli.debug, &log_target)?;

    let mut cfg = load_config()?;
    cfg.apply(cli.overrides());
    let sessions_dir = cfg.resolve_sessions_dir()?;
    let scanner = LogScanner::new(sessions_dir.clone(), cfg.lookback_days);

    if cli.live {
        let settings = LiveSettings {
            sessions_dir,
            refresh_interval: Duration::from_secs(cfg.refresh_seconds),
            poll_interval: Duration::from_millis(cfg.poll_millis),
            warn_threshold: cfg.warn_threshold,
            color: std::env::var_os("NO_COLOR").is_none(),
        };
        run_live(scanner, settings).await?;
    } else {
        let outcome = scanner.scan()?;
        println!(
            "{}",
            render_report(&sessions_dir, &outcome, Utc::now(), format, &Local)?
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_overrides() {
        let cli = Cli::parse_from([
            "codex-meter",
            "-i",
            "/tmp/sessions",
            "--lookback-days",
            "7",
            "--interval",
            "5",
            "--warn-threshold",
            "80",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.sessions_dir, Some(PathBuf::from("/tmp/sessions")));
        assert_eq!(overrides.lookback_days, Some(7));
        assert_eq!(overrides.refresh_seconds, Some(5));
        assert_eq!(overrides.warn_threshold, Some(80.0));
        assert!(!cli.live);
        assert!(cli.command.is_none());
    }

    #[test]
    fn init_subcommand_parses() {
        let cli = Cli::parse_from(["codex-meter", "init"]);
        assert!(matches!(cli.command, Some(Commands::Init)));
    }

    #[test]
    fn format_defaults_to_text() {
        let cli = Cli::parse_from(["codex-meter", "--live"]);
        assert!(cli.live);
        assert_eq!(
            OutputFormat::parse(&cli.format).expect("format"),
            OutputFormat::Text
        );
    }
}
