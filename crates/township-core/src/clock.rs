//! The simulated clock.
//!
//! Simulated time is a minute-of-day in `[0, 1440)` that advances by a fixed
//! step each tick and wraps at midnight. The clock also counts ticks since
//! start so logs can tell two visits to the same minute apart.

use township_types::DAY_MINUTES;

use crate::schedule::DailySchedule;

/// Default simulated minutes per tick.
pub const DEFAULT_STEP_MINUTES: u32 = 5;

/// Default minutes between the earliest wake-up and the start of a run.
pub const WAKE_OFFSET_MINUTES: u32 = 240;

/// Length of the external world's day in game ticks.
const WORLD_DAY_TICKS: u32 = 24_000;

/// Game tick the external world uses for midnight.
const WORLD_MIDNIGHT: u32 = 18_000;

/// Errors from clock construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The step does not divide into a usable day.
    #[error("step of {step} minutes must be between 1 and {max}")]
    InvalidStep {
        /// The rejected step.
        step: u32,
        /// Largest accepted step.
        max: u32,
    },

    /// The start minute lies outside the day.
    #[error("start minute {minute} is outside [0, {DAY_MINUTES})")]
    InvalidStart {
        /// The rejected minute.
        minute: u32,
    },
}

/// Minute-of-day clock advanced once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    minute: u32,
    step: u32,
    tick: u64,
}

impl SimClock {
    /// Create a clock at `start_minute` that advances by `step` minutes.
    pub const fn new(start_minute: u32, step: u32) -> Result<Self, ClockError> {
        if step == 0 || step >= DAY_MINUTES {
            return Err(ClockError::InvalidStep {
                step,
                max: DAY_MINUTES.saturating_sub(1),
            });
        }
        if start_minute >= DAY_MINUTES {
            return Err(ClockError::InvalidStart {
                minute: start_minute,
            });
        }
        Ok(Self {
            minute: start_minute,
            step,
            tick: 0,
        })
    }

    /// Current minute of day.
    pub const fn minute(&self) -> u32 {
        self.minute
    }

    /// Minutes per tick.
    pub const fn step(&self) -> u32 {
        self.step
    }

    /// Ticks completed since the clock was created.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance by one step. Returns `true` when the day wrapped past
    /// midnight.
    pub const fn advance(&mut self) -> bool {
        let next = self.minute.saturating_add(self.step);
        let wrapped = next >= DAY_MINUTES;
        self.minute = if wrapped {
            next.saturating_sub(DAY_MINUTES)
        } else {
            next
        };
        self.tick = self.tick.saturating_add(1);
        wrapped
    }

    /// The current minute as `HH:MM`.
    pub fn label(&self) -> String {
        label(self.minute)
    }
}

/// Format a minute of day as `HH:MM`.
pub fn label(minute: u32) -> String {
    let minute = minute % DAY_MINUTES;
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Map a minute of day onto the external world's 24 000-tick day, where
/// tick 18 000 is midnight.
pub const fn world_time(minute: u32) -> u32 {
    let minute = minute % DAY_MINUTES;
    let scaled = minute.saturating_mul(WORLD_DAY_TICKS) / DAY_MINUTES;
    scaled.saturating_add(WORLD_MIDNIGHT) % WORLD_DAY_TICKS
}

/// Start minute for a run: the earliest wake-up across `schedules` plus
/// `offset`, modulo the day. An agent wakes when the first entry of its
/// schedule (usually sleep) ends.
///
/// With no schedules the run starts at midnight.
pub fn start_minute<'a>(
    schedules: impl IntoIterator<Item = &'a DailySchedule>,
    offset: u32,
) -> u32 {
    schedules
        .into_iter()
        .map(DailySchedule::wake_up_minute)
        .min()
        .map_or(0, |wake| wake.saturating_add(offset) % DAY_MINUTES)
}
