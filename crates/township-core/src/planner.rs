//! Daily schedule regeneration.
//!
//! A plan is built in three rounds of questions to the reasoning service:
//! the wake-up hour, a broad-strokes list for the day, and one activity
//! per waking hour. Consecutive identical hours are then merged into
//! schedule entries, so the result always covers exactly one day.

use std::collections::HashSet;
use std::sync::Arc;

use minijinja::context;
use township_types::{Reasoner, SamplingParams, ScheduleEntry, ServiceError, SessionKey};
use tracing::{debug, info};

use crate::parse;
use crate::persona;
use crate::prompt::{Prompt, PromptEngine, PromptError};
use crate::schedule::{DailySchedule, ScheduleError};

/// Wake-up hour used when the reply holds no number.
pub const DEFAULT_WAKE_UP_HOUR: u32 = 7;

/// Distinct activities a day needs before it is accepted.
const MIN_DISTINCT_ACTIVITIES: usize = 5;

/// Attempts at an hourly breakdown with enough variety.
const DIVERSITY_ATTEMPTS: usize = 3;

const SLEEPING: &str = "sleeping";

/// Errors from regenerating a schedule.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// The reasoning service failed.
    #[error("planning call failed: {0}")]
    Service(#[from] ServiceError),

    /// A planning prompt failed to render.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// The generated plan is not a valid day.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Generates daily schedules from personas.
pub struct Planner {
    reasoner: Arc<dyn Reasoner>,
    prompts: Arc<PromptEngine>,
    sampling: SamplingParams,
}

impl core::fmt::Debug for Planner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Planner")
            .field("reasoner", &self.reasoner.name())
            .field("sampling", &self.sampling)
            .finish_non_exhaustive()
    }
}

impl Planner {
    /// Create a planner.
    pub const fn new(
        reasoner: Arc<dyn Reasoner>,
        prompts: Arc<PromptEngine>,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            reasoner,
            prompts,
            sampling,
        }
    }

    /// Build a fresh schedule for `name` from `persona`.
    pub async fn regenerate(
        &self,
        name: &str,
        persona: &str,
    ) -> Result<DailySchedule, PlanningError> {
        let session = SessionKey::for_agent(name);
        let first_name = persona::first_name(persona).unwrap_or_else(|| name.to_owned());
        let lifestyle = persona::lifestyle(persona).unwrap_or_default();
        let date = chrono::Local::now().format("%A %B %d").to_string();

        let prompt = self.prompts.render(
            Prompt::WakeUp,
            context! { persona, date, lifestyle, first_name },
        )?;
        let reply = self.ask(&session, &prompt).await?;
        let wake_up = parse::first_integer(&reply)
            .parsed()
            .map_or(DEFAULT_WAKE_UP_HOUR, |hour| hour.min(23));

        let prompt = self.prompts.render(
            Prompt::DailyPlan,
            context! { persona, date, lifestyle, first_name, wake_up => wake_up_label(wake_up) },
        )?;
        let plan = parse::single_quoted_items(&self.ask(&session, &prompt).await?);
        debug!(agent = name, wake_up, ?plan, "daily plan drafted");

        let mut hours = Vec::new();
        for attempt in 1..=DIVERSITY_ATTEMPTS {
            hours = self
                .hourly(&session, persona, &first_name, &date, &plan, wake_up)
                .await?;
            let distinct = hours.iter().collect::<HashSet<_>>().len();
            if distinct >= MIN_DISTINCT_ACTIVITIES {
                break;
            }
            debug!(agent = name, attempt, distinct, "hourly plan lacks variety");
        }

        let schedule = DailySchedule::from_entries(compress(&hours))?;
        info!(agent = name, entries = schedule.entries().len(), "schedule regenerated");
        Ok(schedule)
    }

    async fn hourly(
        &self,
        session: &SessionKey,
        persona: &str,
        first_name: &str,
        date: &str,
        plan: &[String],
        wake_up: u32,
    ) -> Result<Vec<String>, PlanningError> {
        let labels: Vec<String> = (0..24).map(hour_label).collect();
        let mut activities: Vec<String> = Vec::with_capacity(labels.len());
        for (hour, label) in (0_u32..).zip(&labels) {
            if hour < wake_up {
                activities.push(SLEEPING.to_owned());
                continue;
            }
            let prompt = self.prompts.render(
                Prompt::Hourly,
                context! {
                    hours => labels,
                    prior => activities,
                    date,
                    persona,
                    first_name,
                    plan,
                    hour => label,
                },
            )?;
            let reply = self.ask(session, &prompt).await?;
            activities.push(first_sentence(&reply));
        }
        Ok(activities)
    }

    async fn ask(&self, session: &SessionKey, prompt: &str) -> Result<String, ServiceError> {
        debug!(%session, prompt, "planning prompt");
        self.reasoner.complete(session, prompt, self.sampling).await
    }
}

/// Merge runs of identical hourly activities into schedule entries.
pub fn compress(hours: &[String]) -> Vec<ScheduleEntry> {
    let mut entries: Vec<ScheduleEntry> = Vec::new();
    for activity in hours {
        match entries.last_mut() {
            Some(last) if last.activity == *activity => {
                last.minutes = last.minutes.saturating_add(60);
            }
            _ => entries.push(ScheduleEntry::new(activity.clone(), 60)),
        }
    }
    entries
}

/// `"07:00 AM"` style label of an hour of the day. Midnight is `"00:00 AM"`.
pub fn hour_label(hour: u32) -> String {
    let suffix = if hour < 12 { "AM" } else { "PM" };
    let shown = if hour == 12 { 12 } else { hour % 12 };
    format!("{shown:02}:00 {suffix}")
}

fn wake_up_label(hour: u32) -> String {
    let suffix = if hour < 12 { "am" } else { "pm" };
    let shown = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{shown}:00 {suffix}")
}

fn first_sentence(reply: &str) -> String {
    let sentence = reply.trim().split('.').next().unwrap_or_default().trim();
    let sentence = sentence.trim_matches('"').trim();
    if sentence.is_empty() {
        "idle".to_owned()
    } else {
        sentence.to_owned()
    }
}
