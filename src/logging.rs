use crate::error::AppError;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_NAME: &str = "codex-meter.log";

#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    /// Append to a file inside this directory; used while the dashboard owns the terminal.
    File(PathBuf),
}

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("codex_meter=debug")
        } else {
            EnvFilter::new("codex_meter=warn")
        }
    })
}

pub fn setup_logging(debug: bool, target: &LogTarget) -> Result<(), AppError> {
    let registry = tracing_subscriber::registry().with(filter(debug));

    // A subscriber may already be installed (tests); keep the existing one.
    match target {
        LogTarget::Stderr => {
            let _ = registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .try_init();
        }
        LogTarget::File(dir) => {
            let file = open_log_file(dir)?;
            let _ = registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init();
        }
    }
    Ok(())
}

fn open_log_file(dir: &Path) -> Result<fs::File, AppError> {
    fs::create_dir_all(dir)?;
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?)
}
