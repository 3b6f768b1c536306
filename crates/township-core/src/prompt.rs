//! Prompt templates rendered with `minijinja`.
//!
//! Every prompt the kernel sends has a built-in template compiled into the
//! binary. Operators can override any of them by dropping a file with the
//! same name (e.g. `reaction.j2`) into the configured templates directory;
//! overrides are read once, when the engine is built.

use std::path::Path;

use minijinja::Environment;
use serde::Serialize;
use tracing::info;

/// Errors from loading or rendering templates.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// An override file could not be read.
    #[error("failed to read template override {path}: {source}")]
    Io {
        /// The override file.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A template failed to compile or render.
    #[error("template {name}: {message}")]
    Template {
        /// Template name.
        name: &'static str,
        /// What went wrong.
        message: String,
    },
}

/// Every prompt the kernel knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prompt {
    /// Whether an observation justifies starting a conversation.
    Reaction,
    /// The topic of a conversation about to start.
    Topic,
    /// The relationship between two agents.
    Relationship,
    /// The next utterance in a conversation.
    Dialogue,
    /// Summary of a finished conversation.
    Summary,
    /// Whether a finished conversation warrants a new plan.
    AlterPlan,
    /// `(subject, object)` of an action.
    SubjectObject,
    /// `(subject, predicate, object)` of an action.
    ActionTriple,
    /// Which point of interest an activity takes place at.
    Location,
    /// Wake-up hour for a persona.
    WakeUp,
    /// Broad-strokes plan for the day.
    DailyPlan,
    /// Activity for one hour of the day.
    Hourly,
}

impl Prompt {
    /// All prompts, in a fixed order.
    pub const ALL: [Self; 12] = [
        Self::Reaction,
        Self::Topic,
        Self::Relationship,
        Self::Dialogue,
        Self::Summary,
        Self::AlterPlan,
        Self::SubjectObject,
        Self::ActionTriple,
        Self::Location,
        Self::WakeUp,
        Self::DailyPlan,
        Self::Hourly,
    ];

    /// Template name, also the override file stem.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reaction => "reaction",
            Self::Topic => "topic",
            Self::Relationship => "relationship",
            Self::Dialogue => "dialogue",
            Self::Summary => "summary",
            Self::AlterPlan => "alter_plan",
            Self::SubjectObject => "subject_object",
            Self::ActionTriple => "action_triple",
            Self::Location => "location",
            Self::WakeUp => "wake_up",
            Self::DailyPlan => "daily_plan",
            Self::Hourly => "hourly",
        }
    }

    const fn builtin(self) -> &'static str {
        match self {
            Self::Reaction => include_str!("../templates/reaction.j2"),
            Self::Topic => include_str!("../templates/topic.j2"),
            Self::Relationship => include_str!("../templates/relationship.j2"),
            Self::Dialogue => include_str!("../templates/dialogue.j2"),
            Self::Summary => include_str!("../templates/summary.j2"),
            Self::AlterPlan => include_str!("../templates/alter_plan.j2"),
            Self::SubjectObject => include_str!("../templates/subject_object.j2"),
            Self::ActionTriple => include_str!("../templates/action_triple.j2"),
            Self::Location => include_str!("../templates/location.j2"),
            Self::WakeUp => include_str!("../templates/wake_up.j2"),
            Self::DailyPlan => include_str!("../templates/daily_plan.j2"),
            Self::Hourly => include_str!("../templates/hourly.j2"),
        }
    }
}

/// Holds every prompt template, compiled.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl core::fmt::Debug for PromptEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PromptEngine").finish_non_exhaustive()
    }
}

impl PromptEngine {
    /// Build an engine from the built-in templates only.
    pub fn builtin() -> Result<Self, PromptError> {
        Self::new(None)
    }

    /// Build an engine, preferring `{overrides}/{name}.j2` over the
    /// built-in template wherever such a file exists.
    pub fn new(overrides: Option<&Path>) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        for prompt in Prompt::ALL {
            let source = match overrides.map(|dir| dir.join(format!("{}.j2", prompt.name()))) {
                Some(path) if path.is_file() => {
                    info!(template = prompt.name(), path = %path.display(), "using template override");
                    std::fs::read_to_string(&path).map_err(|source| PromptError::Io {
                        path: path.display().to_string(),
                        source,
                    })?
                }
                _ => prompt.builtin().to_owned(),
            };
            env.add_template_owned(prompt.name(), source)
                .map_err(|e| PromptError::Template {
                    name: prompt.name(),
                    message: format!("failed to compile: {e}"),
                })?;
        }
        Ok(Self { env })
    }

    /// Render `prompt` with `context`.
    pub fn render<S: Serialize>(&self, prompt: Prompt, context: S) -> Result<String, PromptError> {
        self.env
            .get_template(prompt.name())
            .map_err(|e| PromptError::Template {
                name: prompt.name(),
                message: format!("missing: {e}"),
            })?
            .render(context)
            .map_err(|e| PromptError::Template {
                name: prompt.name(),
                message: format!("render failed: {e}"),
            })
    }
}
