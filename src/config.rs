use crate::error::AppError;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "codex-meter";

pub const MIN_REFRESH_SECONDS: u64 = 1;
pub const MIN_POLL_MILLIS: u64 = 20;

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("CODEX_METER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "codex-meter", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".codex-meter"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sessions_dir: Option<PathBuf>,
    pub lookback_days: u32,
    pub refresh_seconds: u64,
    pub warn_threshold: f64,
    pub poll_millis: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sessions_dir: None,
            lookback_days: 30,
            refresh_seconds: 10,
            warn_threshold: 70.0,
            poll_millis: 200,
        }
    }
}

/// Values supplied on the command line; each one overrides the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub sessions_dir: Option<PathBuf>,
    pub lookback_days: Option<u32>,
    pub refresh_seconds: Option<u64>,
    pub warn_threshold: Option<f64>,
}

impl AppConfig {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(dir) = overrides.sessions_dir {
            self.sessions_dir = Some(dir);
        }
        if let Some(days) = overrides.lookback_days {
            self.lookback_days = days;
        }
        if let Some(secs) = overrides.refresh_seconds {
            self.refresh_seconds = secs;
        }
        if let Some(pct) = overrides.warn_threshold {
            self.warn_threshold = pct;
        }
        normalize_config(self);
    }

    /// Explicit path, then the configured one, then `~/.codex/sessions`.
    pub fn resolve_sessions_dir(&self) -> Result<PathBuf, AppError> {
        match &self.sessions_dir {
            Some(dir) => Ok(expand_home(dir)),
            None => default_sessions_dir(),
        }
    }
}

pub fn default_sessions_dir() -> Result<PathBuf, AppError> {
    let base = BaseDirs::new()
        .ok_or_else(|| AppError::Config("cannot determine home directory".into()))?;
    Ok(base.home_dir().join(".codex").join("sessions"))
}

pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(base) => base.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    if config.refresh_seconds < MIN_REFRESH_SECONDS {
        config.refresh_seconds = MIN_REFRESH_SECONDS;
        changed = true;
    }
    if config.poll_millis < MIN_POLL_MILLIS {
        config.poll_millis = MIN_POLL_MILLIS;
        changed = true;
    }
    let clamped = if config.warn_threshold.is_nan() {
        AppConfig::default().warn_threshold
    } else {
        config.warn_threshold.clamp(0.0, 100.0)
    };
    if clamped != config.warn_threshold {
        config.warn_threshold = clamped;
        changed = true;
    }

    changed
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn log_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("logs"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(log_dir()?)?;
    Ok(())
}

pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let raw = fs::read_to_string(path)?;
    let mut parsed: AppConfig = toml::from_str(&raw)?;
    if normalize_config(&mut parsed) {
        tracing::warn!(path = %path.display(), "config values out of range were adjusted");
    }
    Ok(parsed)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<PathBuf, AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !cfg_path.exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(cfg_path)
}
