//! Persisted schedule entries.
//!
//! A schedule file is a JSON document with a single `schedule` array of
//! `[activity, minutes]` pairs. The kernel validates and indexes it; this
//! module only defines the wire shape.

use serde::{Deserialize, Serialize};

/// Length of one simulated day in minutes. Every schedule must cover it
/// exactly.
pub const DAY_MINUTES: u32 = 1440;

/// One `(activity, duration)` item of a daily schedule.
///
/// Serialized as a two-element array, e.g. `["sleeping", 420]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, u32)", into = "(String, u32)")]
pub struct ScheduleEntry {
    /// Activity label, e.g. `"brewing coffee"`.
    pub activity: String,
    /// Duration in minutes.
    pub minutes: u32,
}

impl ScheduleEntry {
    /// Create a new schedule entry.
    pub fn new(activity: impl Into<String>, minutes: u32) -> Self {
        Self {
            activity: activity.into(),
            minutes,
        }
    }
}

impl From<(String, u32)> for ScheduleEntry {
    fn from((activity, minutes): (String, u32)) -> Self {
        Self { activity, minutes }
    }
}

impl From<ScheduleEntry> for (String, u32) {
    fn from(entry: ScheduleEntry) -> Self {
        (entry.activity, entry.minutes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_as_pair() {
        let json = serde_json::to_string(&ScheduleEntry::new("sleeping", 420)).unwrap();
        assert_eq!(json, r#"["sleeping",420]"#);
    }

    #[test]
    fn entry_deserializes_from_pair() {
        let entry: ScheduleEntry = serde_json::from_str(r#"["reading", 60]"#).unwrap();
        assert_eq!(entry, ScheduleEntry::new("reading", 60));
    }
}
