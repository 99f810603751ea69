use crate::error::AppError;
use crate::models::{parse_line, EventRecord, LineOutcome};
use chrono::{Datelike, Days, Local, NaiveDate};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILE_PREFIX: &str = "rollout-";
const FILE_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Found { record: EventRecord, path: PathBuf },
    NotFound,
}

/// Finds the freshest token-count event under a `YYYY/MM/DD` session tree.
#[derive(Debug, Clone)]
pub struct LogScanner {
    root: PathBuf,
    lookback_days: u32,
}

impl LogScanner {
    pub fn new(root: impl Into<PathBuf>, lookback_days: u32) -> Self {
        Self {
            root: root.into(),
            lookback_days,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    pub fn scan(&self) -> Result<ScanOutcome, AppError> {
        self.scan_from(Local::now().date_naive())
    }

    /// Scans `today` and every earlier day up to the look-back bound. Missing
    /// days are skipped and the whole range is always visited.
    pub fn scan_from(&self, today: NaiveDate) -> Result<ScanOutcome, AppError> {
        if !self.check_root()? {
            return Ok(ScanOutcome::NotFound);
        }

        let mut best: Option<(EventRecord, PathBuf)> = None;
        let mut days_visited = 0usize;
        let mut files_read = 0usize;

        for day in self.candidate_days(today) {
            let dir = self.day_dir(day);
            if !dir.is_dir() {
                continue;
            }
            days_visited += 1;

            for path in rollout_files(&dir) {
                files_read += 1;
                let Some(record) = latest_in_file(&path) else {
                    continue;
                };
                let newer = best
                    .as_ref()
                    .map_or(true, |(current, _)| record.timestamp >= current.timestamp);
                if newer {
                    best = Some((record, path));
                }
            }
        }

        debug!(
            root = %self.root.display(),
            days_visited,
            files_read,
            found = best.is_some(),
            "scan finished"
        );

        Ok(match best {
            Some((record, path)) => ScanOutcome::Found { record, path },
            None => ScanOutcome::NotFound,
        })
    }

    pub fn candidate_days(&self, today: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        (0..=u64::from(self.lookback_days))
            .map_while(move |offset| today.checked_sub_days(Days::new(offset)))
    }

    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", day.year()))
            .join(format!("{:02}", day.month()))
            .join(format!("{:02}", day.day()))
    }

    /// `Ok(false)` for a root that does not exist yet; an error when the root
    /// exists but cannot be listed.
    fn check_root(&self) -> Result<bool, AppError> {
        let root_error = |source: io::Error| AppError::RootAccess {
            path: self.root.clone(),
            source,
        };

        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {
                fs::read_dir(&self.root).map_err(root_error)?;
                Ok(true)
            }
            Ok(_) => Err(root_error(io::Error::other("not a directory"))),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "sessions directory does not exist");
                Ok(false)
            }
            Err(err) => Err(root_error(err)),
        }
    }
}

fn rollout_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "skipping unreadable day directory");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_rollout_file(path))
        .collect();
    files.sort();
    files
}

fn is_rollout_file(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(FILE_PREFIX));
    let ext_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(FILE_EXTENSION));
    name_matches && ext_matches
}

/// Latest token-count event in one file, or `None` when the file has none or
/// cannot be opened.
fn latest_in_file(path: &Path) -> Option<EventRecord> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "skipping unreadable session file");
            return None;
        }
    };

    let mut latest: Option<EventRecord> = None;
    let mut malformed = 0usize;

    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                malformed += 1;
                continue;
            }
            Err(err) => {
                warn!(file = %path.display(), error = %err, "stopped reading session file");
                break;
            }
        };

        match parse_line(&line) {
            LineOutcome::Event(record) => {
                if !record.total.is_consistent() {
                    debug!(
                        file = %path.display(),
                        supplied = record.total.total(),
                        summed = record.total.component_sum(),
                        "total_tokens disagrees with component sum"
                    );
                }
                if latest
                    .as_ref()
                    .map_or(true, |current| record.timestamp >= current.timestamp)
                {
                    latest = Some(record);
                }
            }
            LineOutcome::Malformed => malformed += 1,
            LineOutcome::Ignored => {}
        }
    }

    if malformed > 0 {
        debug!(file = %path.display(), malformed, "skipped malformed lines");
    }
    latest
}
