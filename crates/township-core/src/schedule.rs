//! Validated daily schedules and their JSON files.
//!
//! A [`DailySchedule`] is an ordered list of `(activity, minutes)` entries
//! whose durations sum to exactly one day. Construction derives the
//! half-open intervals they cover, so looking up the activity for a minute
//! always finds exactly one interval.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use township_types::{DAY_MINUTES, ScheduleEntry};

/// Errors from building, loading, or saving a schedule.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The schedule has no entries.
    #[error("schedule has no entries")]
    Empty,

    /// An entry lasts zero minutes.
    #[error("entry {index} ({activity:?}) has zero duration")]
    ZeroDuration {
        /// Position of the entry.
        index: usize,
        /// Its activity label.
        activity: String,
    },

    /// Durations do not add up to a day.
    #[error("schedule covers {total} minutes, expected {DAY_MINUTES}")]
    DurationMismatch {
        /// Sum of all durations.
        total: u64,
    },

    /// Reading or writing the schedule file failed.
    #[error("schedule file {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The schedule file is not valid JSON of the expected shape.
    #[error("schedule file {path} is malformed: {source}")]
    Serde {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// A derived, read-only `[start, end)` interval of the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleInterval {
    /// First minute covered.
    pub start: u32,
    /// First minute no longer covered.
    pub end: u32,
    /// Activity performed during the interval.
    pub activity: String,
}

impl ScheduleInterval {
    /// Whether `minute` falls inside this interval.
    pub const fn contains(&self, minute: u32) -> bool {
        self.start <= minute && minute < self.end
    }
}

/// An agent's plan for the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    entries: Vec<ScheduleEntry>,
    intervals: Vec<ScheduleInterval>,
}

impl DailySchedule {
    /// Validate `entries` and derive their intervals.
    ///
    /// Rejects empty schedules, zero-length entries, and schedules that do
    /// not sum to [`DAY_MINUTES`].
    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Result<Self, ScheduleError> {
        if entries.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let mut intervals = Vec::with_capacity(entries.len());
        let mut start: u64 = 0;
        for (index, entry) in entries.iter().enumerate() {
            if entry.minutes == 0 {
                return Err(ScheduleError::ZeroDuration {
                    index,
                    activity: entry.activity.clone(),
                });
            }
            let end = start.saturating_add(u64::from(entry.minutes));
            if end <= u64::from(DAY_MINUTES) {
                intervals.push(ScheduleInterval {
                    start: u32::try_from(start).unwrap_or(DAY_MINUTES),
                    end: u32::try_from(end).unwrap_or(DAY_MINUTES),
                    activity: entry.activity.clone(),
                });
            }
            start = end;
        }

        if start != u64::from(DAY_MINUTES) {
            return Err(ScheduleError::DurationMismatch { total: start });
        }
        Ok(Self { entries, intervals })
    }

    /// The entries as given.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// The derived intervals, in order.
    pub fn intervals(&self) -> &[ScheduleInterval] {
        &self.intervals
    }

    /// The activity scheduled at `minute` (taken modulo the day).
    pub fn activity_at(&self, minute: u32) -> &str {
        let minute = minute % DAY_MINUTES;
        let index = self.intervals.partition_point(|interval| interval.end <= minute);
        self.intervals
            .get(index)
            .map_or("", |interval| interval.activity.as_str())
    }

    /// The minute the first entry ends, which is when the agent wakes up.
    pub fn wake_up_minute(&self) -> u32 {
        self.intervals.first().map_or(0, |interval| interval.end) % DAY_MINUTES
    }
}

/// On-disk shape: `{"schedule": [["sleeping", 420], ...]}`.
#[derive(Debug, Serialize, Deserialize)]
struct ScheduleDocument {
    schedule: Vec<ScheduleEntry>,
}

/// Load and validate a schedule file.
pub async fn load_schedule(path: &Path) -> Result<DailySchedule, ScheduleError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ScheduleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let document: ScheduleDocument =
        serde_json::from_str(&raw).map_err(|source| ScheduleError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
    DailySchedule::from_entries(document.schedule)
}

/// Write a schedule file, replacing any previous content.
pub async fn save_schedule(path: &Path, schedule: &DailySchedule) -> Result<(), ScheduleError> {
    let document = ScheduleDocument {
        schedule: schedule.entries().to_vec(),
    };
    let json = serde_json::to_string_pretty(&document).map_err(|source| ScheduleError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ScheduleError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|source| ScheduleError::Io {
            path: path.to_path_buf(),
            source,
        })
}
