//! Agent state and the per-tick behavior state machine.
//!
//! Once per tick every agent runs [`Agent::step`] with the current minute
//! and a snapshot of last tick's events. The step either carries on the
//! agent's active conversation, reacts to an observed event, or takes the
//! mundane path of simply doing what the schedule says. Whatever happens,
//! the agent then decides where it should be and walks there.
//!
//! A step only ever mutates its own agent. Effects on the conversation
//! partner after a conversation ends travel back to the scheduler as a
//! [`Debrief`] and are applied after the tick's barrier.

use std::path::PathBuf;
use std::sync::Arc;

use minijinja::context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::Serialize;
use township_memory::{MemoryError, MemoryStore, render_hits};
use township_types::{Event, Reasoner, SamplingParams, ServiceError, SessionKey};
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::SimulationConfig;
use crate::conversation::{Conversation, ConversationManager, Utterance};
use crate::embodiment::Embodiment;
use crate::parse;
use crate::persona;
use crate::planner::{Planner, PlanningError};
use crate::prompt::{Prompt, PromptEngine, PromptError};
use crate::registry::AgentRegistry;
use crate::schedule::{self, DailySchedule, ScheduleError};
use crate::world::{Coordinates, WorldMap};

/// Predicate of the memory each participant keeps of a conversation.
pub const TALKS_TO: &str = "Talks to";

/// Errors that end an agent's tick early. The scheduler isolates them.
#[derive(Debug, thiserror::Error)]
pub enum BehaviorError {
    /// An observed event names an agent that is not registered.
    #[error("{agent} observed unknown agent {subject}")]
    UnknownAgentReference {
        /// The observing agent.
        agent: String,
        /// The unresolvable subject.
        subject: String,
    },

    /// The memory store failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// A regenerated schedule could not be saved.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Regenerating the schedule failed.
    #[error(transparent)]
    Planning(#[from] PlanningError),

    /// A prompt template failed to render.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// The reasoning service failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// What an agent did during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehaviorState {
    /// Following the schedule.
    #[default]
    Idle,
    /// Deciding whether an observation is worth a conversation.
    EvaluatingReaction,
    /// Holding the turn and talking.
    Speaking,
    /// Waiting for the partner to talk.
    Listening,
    /// Closing a conversation.
    Concluding,
}

impl BehaviorState {
    /// Lowercase name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::EvaluatingReaction => "evaluating_reaction",
            Self::Speaking => "speaking",
            Self::Listening => "listening",
            Self::Concluding => "concluding",
        }
    }
}

impl core::fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effects of a finished conversation on the participant that did not
/// conclude it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debrief {
    /// Agent the debrief is for.
    pub participant: String,
    /// The agent that concluded the conversation.
    pub counterpart: String,
    /// Summary of the conversation.
    pub summary: String,
    /// Full transcript.
    pub transcript: Vec<Utterance>,
    /// What it was about.
    pub topic: String,
}

/// Result of one [`Agent::step`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// The state the agent ended the tick in.
    pub state: BehaviorState,
    /// Events to publish for the next tick.
    pub events: Vec<Event>,
    /// Work for the conversation partner, if a conversation ended.
    pub debrief: Option<Debrief>,
}

/// Conversation tuning and sampling used by every agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorSettings {
    /// The turn holder speaks while the transcript is shorter than this.
    pub speak_bound: usize,
    /// The other participant listens while the transcript is shorter than
    /// this.
    pub listen_bound: usize,
    /// Transcript lines shown when generating an utterance.
    pub history_window: usize,
    /// Sampling for every completion.
    pub sampling: SamplingParams,
}

impl BehaviorSettings {
    /// Settings from the `conversation` and `llm` sections.
    pub const fn from_config(config: &SimulationConfig) -> Self {
        Self {
            speak_bound: config.conversation.speak_bound,
            listen_bound: config.conversation.listen_bound,
            history_window: config.conversation.history_window,
            sampling: SamplingParams {
                temperature: config.llm.temperature,
                max_tokens: None,
            },
        }
    }
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

/// Everything a behavior step needs besides its own agent.
pub struct BehaviorContext {
    /// Every agent of the run.
    pub registry: AgentRegistry,
    /// Owner of active conversations.
    pub conversations: ConversationManager,
    /// Reasoning service for decisions and dialogue.
    pub reasoner: Arc<dyn Reasoner>,
    /// The controller acting in the external world.
    pub embodiment: Arc<dyn Embodiment>,
    /// Prompt templates.
    pub prompts: Arc<PromptEngine>,
    /// Schedule regeneration.
    pub planner: Planner,
    /// Points of interest.
    pub world: WorldMap,
    /// Conversation bounds and sampling.
    pub settings: BehaviorSettings,
}

impl core::fmt::Debug for BehaviorContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BehaviorContext")
            .field("agents", &self.registry.len())
            .field("reasoner", &self.reasoner.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// One simulated persona.
#[derive(Debug)]
pub struct Agent {
    name: String,
    persona: String,
    schedule: DailySchedule,
    schedule_path: Option<PathBuf>,
    memory: MemoryStore,
    destination: Option<String>,
    position: Option<Coordinates>,
    state: BehaviorState,
    rng: StdRng,
}

impl Agent {
    /// Create an agent. `seed` drives its event selection.
    pub fn new(
        name: impl Into<String>,
        persona: impl Into<String>,
        schedule: DailySchedule,
        memory: MemoryStore,
        seed: u64,
    ) -> Self {
        Self {
            name: name.into(),
            persona: persona.into(),
            schedule,
            schedule_path: None,
            memory,
            destination: None,
            position: None,
            state: BehaviorState::Idle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Persist regenerated schedules to `path`.
    #[must_use]
    pub fn with_schedule_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schedule_path = Some(path.into());
        self
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current persona text.
    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// Current schedule.
    pub const fn schedule(&self) -> &DailySchedule {
        &self.schedule
    }

    /// Long-term memory.
    pub const fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// State at the end of the last tick.
    pub const fn state(&self) -> BehaviorState {
        self.state
    }

    /// Current destination, if one was chosen.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Coordinates of the current destination.
    pub const fn position(&self) -> Option<Coordinates> {
        self.position
    }

    /// Run one tick of behavior.
    pub async fn step(
        &mut self,
        ctx: &BehaviorContext,
        minute: u32,
        snapshot: &[Event],
    ) -> Result<TickOutcome, BehaviorError> {
        let activity = self.schedule.activity_at(minute).to_owned();
        let view = ctx.conversations.view(&self.name);
        let mut outcome = TickOutcome::default();

        let (state, current) = if let Some(conversation) = view.conversation {
            self.converse(ctx, minute, &activity, conversation, &mut outcome)
                .await?
        } else {
            let relevant: Vec<&Event> = snapshot
                .iter()
                .filter(|event| event.subject != self.name)
                .collect();
            let chosen = if view.chatted_today {
                None
            } else {
                relevant.choose(&mut self.rng).copied()
            };
            match chosen {
                Some(event) if !event.signals_sleep() => {
                    self.observe(ctx, minute, &activity, event, &mut outcome.events)
                        .await?
                }
                _ => {
                    self.mundane(ctx, &activity, &mut outcome.events).await;
                    (BehaviorState::Idle, activity.clone())
                }
            }
        };

        outcome.state = state;
        self.update_destination(ctx, &current).await;
        self.state = state;
        debug!(agent = %self.name, minute, activity, state = %outcome.state, events = outcome.events.len(), "step done");
        Ok(outcome)
    }

    /// Apply the effects of a conversation the partner concluded.
    pub async fn absorb_debrief(
        &mut self,
        ctx: &BehaviorContext,
        debrief: &Debrief,
    ) -> Result<(), BehaviorError> {
        self.memory
            .store(&debrief.summary, &self.name, TALKS_TO, &debrief.counterpart)
            .await?;
        self.reconsider_plan(ctx, &debrief.transcript, &debrief.summary)
            .await?;
        self.state = BehaviorState::Idle;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    /// Do what the schedule says and publish it.
    async fn mundane(&mut self, ctx: &BehaviorContext, activity: &str, events: &mut Vec<Event>) {
        let (mut subject, mut object) = match self
            .ask(ctx, Prompt::SubjectObject, context! { name => self.name, action => activity })
            .await
        {
            Ok(reply) => parse::subject_object(&reply),
            Err(e) => {
                warn!(agent = %self.name, error = %e, "subject extraction failed, using activity");
                (self.name.clone(), activity.to_owned())
            }
        };
        if subject.is_empty() {
            subject.clone_from(&self.name);
        }
        if object.is_empty() {
            activity.clone_into(&mut object);
        }

        let predicate = match self
            .ask(
                ctx,
                Prompt::ActionTriple,
                context! { name => self.name, action => activity, subject, object },
            )
            .await
        {
            Ok(reply) => parse::subject_predicate_object(&reply).1,
            Err(e) => {
                warn!(agent = %self.name, error = %e, "predicate extraction failed");
                String::new()
            }
        };
        let predicate = if predicate.is_empty() {
            "is".to_owned()
        } else {
            predicate
        };

        if let Err(e) = self
            .memory
            .store(activity, &self.name, &predicate, &object)
            .await
        {
            warn!(agent = %self.name, error = %e, "failed to remember activity");
        }
        events.push(Event::new(subject, object, activity));
    }

    /// React to `event`: maybe start a conversation, otherwise fall back to
    /// the mundane path. Returns the end state and what the agent is doing.
    async fn observe(
        &mut self,
        ctx: &BehaviorContext,
        minute: u32,
        activity: &str,
        event: &Event,
        events: &mut Vec<Event>,
    ) -> Result<(BehaviorState, String), BehaviorError> {
        let target = event.subject.as_str();
        if !ctx.registry.contains(target) {
            warn!(agent = %self.name, subject = target, "observed event from unknown agent");
            return Err(BehaviorError::UnknownAgentReference {
                agent: self.name.clone(),
                subject: target.to_owned(),
            });
        }

        self.state = BehaviorState::EvaluatingReaction;
        self.remember_observation(ctx, event).await;
        let memories = self.recall(target).await;
        let clock = clock::label(minute);
        let observation = format!("{target} is {}", event.description);

        let reaction = self
            .ask(
                ctx,
                Prompt::Reaction,
                context! {
                    persona => self.persona,
                    clock,
                    name => self.name,
                    target,
                    observation => event.description,
                    memories,
                    activity,
                },
            )
            .await;
        match reaction {
            Ok(reply) if parse::affirmative(&reply) => {}
            Ok(reply) => {
                debug!(agent = %self.name, target, reply, "decided not to talk");
                self.mundane(ctx, activity, events).await;
                return Ok((BehaviorState::Idle, activity.to_owned()));
            }
            Err(e) => {
                warn!(agent = %self.name, error = %e, "reaction call failed, staying on schedule");
                self.mundane(ctx, activity, events).await;
                return Ok((BehaviorState::Idle, activity.to_owned()));
            }
        }

        let opening = self
            .opening(ctx, &clock, activity, target, &observation, &memories)
            .await;
        let (topic, utterance) = match opening {
            Ok(opening) => opening,
            Err(e) => {
                warn!(agent = %self.name, target, error = %e, "could not open conversation, staying on schedule");
                self.mundane(ctx, activity, events).await;
                return Ok((BehaviorState::Idle, activity.to_owned()));
            }
        };

        if let Err(e) = ctx
            .conversations
            .open(&self.name, target, &topic, &utterance)
        {
            debug!(agent = %self.name, target, error = %e, "conversation not started");
            self.mundane(ctx, activity, events).await;
            return Ok((BehaviorState::Idle, activity.to_owned()));
        }

        info!(agent = %self.name, target, topic, "conversation started");
        let description = talking_description(&self.name, target, &topic, &utterance);
        events.push(Event::new(self.name.clone(), target, description.clone()));
        if let Err(e) = ctx.embodiment.say(&self.name, &utterance).await {
            warn!(agent = %self.name, error = %e, "say failed");
        }
        Ok((BehaviorState::Speaking, description))
    }

    /// Ask for a topic and the first utterance of a conversation.
    async fn opening(
        &self,
        ctx: &BehaviorContext,
        clock: &str,
        activity: &str,
        target: &str,
        observation: &str,
        memories: &str,
    ) -> Result<(String, String), BehaviorError> {
        let reply = self
            .ask(
                ctx,
                Prompt::Topic,
                context! {
                    persona => self.persona,
                    name => self.name,
                    observation,
                    target,
                    memories,
                    activity,
                },
            )
            .await?;
        let topic = parse::short_answer(&reply);

        let relationship = self.relationship(ctx, target, observation, memories).await;
        let reply = self
            .ask(
                ctx,
                Prompt::Dialogue,
                context! {
                    persona => self.persona,
                    clock,
                    name => self.name,
                    activity,
                    target,
                    relationship,
                    memories,
                    observation,
                    topic,
                    history => Vec::<Utterance>::new(),
                },
            )
            .await?;
        Ok((topic, parse::utterance(&reply)))
    }

    /// Continue the active conversation. Returns the end state and what the
    /// agent is doing.
    async fn converse(
        &mut self,
        ctx: &BehaviorContext,
        minute: u32,
        activity: &str,
        conversation: Conversation,
        outcome: &mut TickOutcome,
    ) -> Result<(BehaviorState, String), BehaviorError> {
        let Some(partner) = conversation.partner_of(&self.name).map(str::to_owned) else {
            return Ok((BehaviorState::Idle, activity.to_owned()));
        };
        let len = conversation.transcript.len();
        let has_turn = conversation.turn_holder == self.name;

        if has_turn && len < ctx.settings.speak_bound {
            match self
                .speak(ctx, minute, activity, &conversation, &partner)
                .await
            {
                Ok(Some(event)) => {
                    let description = event.description.clone();
                    outcome.events.push(event);
                    return Ok((BehaviorState::Speaking, description));
                }
                Ok(None) => {
                    self.mundane(ctx, activity, &mut outcome.events).await;
                    return Ok((BehaviorState::Idle, activity.to_owned()));
                }
                Err(e) => {
                    warn!(agent = %self.name, partner, error = %e, "could not continue conversation, ending it");
                }
            }
        } else if !has_turn && len < ctx.settings.listen_bound {
            let description = format!(
                "{} is Listening to {partner} said about {}.",
                self.name, conversation.topic
            );
            outcome.events.push(Event::new(
                self.name.clone(),
                partner.clone(),
                description.clone(),
            ));
            if let Err(e) = ctx.conversations.claim_turn(conversation.id, &self.name) {
                debug!(agent = %self.name, error = %e, "conversation ended while listening");
            }
            if let Err(e) = ctx.embodiment.stare(&self.name, &partner).await {
                warn!(agent = %self.name, error = %e, "stare failed");
            }
            return Ok((BehaviorState::Listening, description));
        }

        outcome.debrief = self.conclude(ctx, &conversation, &partner).await;
        Ok((BehaviorState::Concluding, activity.to_owned()))
    }

    /// Generate and record the next utterance. `None` when the
    /// conversation ended concurrently.
    async fn speak(
        &self,
        ctx: &BehaviorContext,
        minute: u32,
        activity: &str,
        conversation: &Conversation,
        partner: &str,
    ) -> Result<Option<Event>, BehaviorError> {
        let memories = self.recall(partner).await;
        let observation = format!(
            "{partner} is talking with {} about {}",
            self.name, conversation.topic
        );
        let relationship = self
            .relationship(ctx, partner, &observation, &memories)
            .await;
        let reply = self
            .ask(
                ctx,
                Prompt::Dialogue,
                context! {
                    persona => self.persona,
                    clock => clock::label(minute),
                    name => self.name,
                    activity,
                    target => partner,
                    relationship,
                    memories,
                    observation,
                    topic => conversation.topic,
                    history => conversation.recent(ctx.settings.history_window),
                },
            )
            .await?;
        let utterance = parse::utterance(&reply);

        if let Err(e) = ctx
            .conversations
            .record_utterance(conversation.id, &self.name, &utterance)
        {
            debug!(agent = %self.name, error = %e, "conversation ended before speaking");
            return Ok(None);
        }
        if let Err(e) = ctx.embodiment.say(&self.name, &utterance).await {
            warn!(agent = %self.name, error = %e, "say failed");
        }
        Ok(Some(Event::new(
            self.name.clone(),
            partner,
            talking_description(&self.name, partner, &conversation.topic, &utterance),
        )))
    }

    /// Close the conversation, remember it, and hand the partner's share
    /// back to the scheduler.
    async fn conclude(
        &mut self,
        ctx: &BehaviorContext,
        conversation: &Conversation,
        partner: &str,
    ) -> Option<Debrief> {
        let closed = ctx.conversations.conclude(conversation.id)?;
        let summary = self.summarize(ctx, &closed, partner).await;
        info!(agent = %self.name, partner, turns = closed.transcript.len(), summary, "conversation concluded");

        if let Err(e) = self
            .memory
            .store(&summary, &self.name, TALKS_TO, partner)
            .await
        {
            warn!(agent = %self.name, error = %e, "failed to remember conversation");
        }
        if let Err(e) = self.reconsider_plan(ctx, &closed.transcript, &summary).await {
            warn!(agent = %self.name, error = %e, "plan left unchanged");
        }

        Some(Debrief {
            participant: partner.to_owned(),
            counterpart: self.name.clone(),
            summary,
            transcript: closed.transcript,
            topic: closed.topic,
        })
    }

    async fn summarize(
        &self,
        ctx: &BehaviorContext,
        conversation: &Conversation,
        partner: &str,
    ) -> String {
        let reply = self
            .ask(
                ctx,
                Prompt::Summary,
                context! {
                    persona => self.persona,
                    name => self.name,
                    target => partner,
                    transcript => conversation.transcript,
                },
            )
            .await;
        match reply {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_owned(),
            Ok(_) => fallback_summary(&self.name, partner, &conversation.topic),
            Err(e) => {
                warn!(agent = %self.name, error = %e, "summary failed");
                fallback_summary(&self.name, partner, &conversation.topic)
            }
        }
    }

    /// Ask whether the conversation changes today's plan; if so, rewrite
    /// the persona's status and regenerate the schedule. Returns whether
    /// the schedule was replaced.
    async fn reconsider_plan(
        &mut self,
        ctx: &BehaviorContext,
        transcript: &[Utterance],
        summary: &str,
    ) -> Result<bool, BehaviorError> {
        let reply = self
            .ask(
                ctx,
                Prompt::AlterPlan,
                context! {
                    persona => self.persona,
                    name => self.name,
                    schedule => self.schedule.entries(),
                    transcript,
                    summary,
                },
            )
            .await?;
        if !parse::affirmative(&reply) {
            return Ok(false);
        }

        self.persona = persona::replace_currently(&self.persona, summary);
        let schedule = ctx.planner.regenerate(&self.name, &self.persona).await?;
        if let Some(path) = &self.schedule_path {
            schedule::save_schedule(path, &schedule).await?;
        }
        info!(agent = %self.name, entries = schedule.entries().len(), "plan changed after conversation");
        self.schedule = schedule;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Decide where the current activity happens and walk there if that
    /// changed.
    async fn update_destination(&mut self, ctx: &BehaviorContext, activity: &str) {
        if ctx.world.is_empty() {
            return;
        }
        let destinations: Vec<&str> = ctx.world.names().collect();
        let reply = self
            .ask(
                ctx,
                Prompt::Location,
                context! {
                    name => self.name,
                    destination => self.destination.as_deref().unwrap_or("unknown"),
                    action => activity,
                    destinations,
                },
            )
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                debug!(agent = %self.name, error = %e, "location call failed, keeping destination");
                return;
            }
        };
        let Some(found) = parse::contained_keyword(&reply, destinations, false) else {
            debug!(agent = %self.name, reply, "no destination in reply");
            return;
        };
        if self.destination.as_deref() == Some(found) {
            return;
        }

        self.destination = Some(found.to_owned());
        self.position = ctx.world.position(found);
        if let Some(target) = self.position {
            info!(agent = %self.name, destination = found, %target, "moving");
            if let Err(e) = ctx
                .embodiment
                .navigate(&self.name, target, ctx.world.arrival_tolerance)
                .await
            {
                warn!(agent = %self.name, error = %e, "navigate failed");
            }
        }
    }

    /// Remember what was observed, as the fact extracted from the event.
    async fn remember_observation(&mut self, ctx: &BehaviorContext, event: &Event) {
        let (subject, predicate, object) = match self
            .ask(
                ctx,
                Prompt::ActionTriple,
                context! {
                    name => event.subject,
                    action => event.description,
                    subject => event.subject,
                    object => event.object,
                },
            )
            .await
        {
            Ok(reply) => parse::subject_predicate_object(&reply),
            Err(e) => {
                debug!(agent = %self.name, error = %e, "observation extraction failed");
                (event.subject.clone(), String::new(), event.object.clone())
            }
        };
        let subject = if subject.is_empty() { event.subject.clone() } else { subject };
        let predicate = if predicate.is_empty() { "is".to_owned() } else { predicate };
        if let Err(e) = self
            .memory
            .store(&event.description, &subject, &predicate, &object)
            .await
        {
            warn!(agent = %self.name, error = %e, "failed to remember observation");
        }
    }

    /// Rendered memories related to `query`; empty on failure.
    async fn recall(&self, query: &str) -> String {
        match self.memory.search(query).await {
            Ok(hits) => render_hits(&hits),
            Err(e) => {
                warn!(agent = %self.name, error = %e, "memory search failed");
                String::new()
            }
        }
    }

    async fn relationship(
        &self,
        ctx: &BehaviorContext,
        target: &str,
        observation: &str,
        memories: &str,
    ) -> String {
        match self
            .ask(
                ctx,
                Prompt::Relationship,
                context! { name => self.name, target, observation, memories },
            )
            .await
        {
            Ok(reply) => reply.trim().to_owned(),
            Err(e) => {
                debug!(agent = %self.name, error = %e, "relationship unknown");
                "unknown".to_owned()
            }
        }
    }

    async fn ask<S: Serialize + Send>(
        &self,
        ctx: &BehaviorContext,
        prompt: Prompt,
        vars: S,
    ) -> Result<String, BehaviorError> {
        let text = ctx.prompts.render(prompt, vars)?;
        let session = SessionKey::for_agent(&self.name);
        debug!(agent = %self.name, prompt = prompt.name(), text, "prompt");
        let reply = ctx
            .reasoner
            .complete(&session, &text, ctx.settings.sampling)
            .await?;
        debug!(agent = %self.name, prompt = prompt.name(), reply, "reply");
        Ok(reply)
    }
}

fn talking_description(speaker: &str, target: &str, topic: &str, utterance: &str) -> String {
    format!("{speaker} is talking to {target} about {topic} said {utterance}.")
}

fn fallback_summary(name: &str, partner: &str, topic: &str) -> String {
    format!("{name} and {partner} talked about {topic}.")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{OnceLock, Weak};

    use async_trait::async_trait;
    use township_types::ScheduleEntry;
    use township_types::testkit::{FailingReasoner, FixedEmbedder, ScriptedReasoner};

    use super::*;
    use crate::embodiment::{Command, RecordingEmbodiment};

    const PERSONA: &str = "Name: Ada\nLifestyle: Ada wakes up at 7 am.\nCurrently: Ada runs the cafe.\n";

    fn day(activity: &str) -> DailySchedule {
        DailySchedule::from_entries(vec![
            ScheduleEntry::new("sleeping", 420),
            ScheduleEntry::new(activity, 1020),
        ])
        .unwrap()
    }

    async fn agent(
        name: &str,
        activity: &str,
        dir: &std::path::Path,
        reasoner: Arc<dyn Reasoner>,
    ) -> Agent {
        let memory = MemoryStore::open(
            name,
            dir,
            reasoner,
            Arc::new(FixedEmbedder::new(4)),
            township_memory::MemoryConfig::default(),
        )
        .await
        .unwrap();
        Agent::new(name, PERSONA.replace("Ada", name), day(activity), memory, 7)
    }

    fn context(
        reasoner: Arc<dyn Reasoner>,
        embodiment: Arc<dyn Embodiment>,
        registry: AgentRegistry,
        world: WorldMap,
    ) -> BehaviorContext {
        let prompts = Arc::new(PromptEngine::builtin().unwrap());
        BehaviorContext {
            registry,
            conversations: ConversationManager::new(),
            planner: Planner::new(Arc::clone(&reasoner), Arc::clone(&prompts), SamplingParams::default()),
            reasoner,
            embodiment,
            prompts,
            world,
            settings: BehaviorSettings::default(),
        }
    }

    fn cafe_map() -> WorldMap {
        serde_yml::from_str("points:\n  cafe: [1, 64, 2]\n  park: [9, 64, 9]\n").unwrap()
    }

    #[test]
    fn settings_follow_config() {
        let settings = BehaviorSettings::default();
        assert_eq!(settings.speak_bound, 10);
        assert_eq!(settings.listen_bound, 5);
        assert_eq!(settings.history_window, 4);
        assert_eq!(BehaviorState::EvaluatingReaction.to_string(), "evaluating_reaction");
    }

    #[tokio::test]
    async fn mundane_step_publishes_activity() {
        let dir = tempfile::tempdir().unwrap();
        let reasoner: Arc<dyn Reasoner> = Arc::new(
            ScriptedReasoner::new("No")
                .with_rule("into (subject, object)", "(Ada, coffee)")
                .with_rule("into (subject, predicate, object)", "(Ada, brew, coffee)")
                .with_rule("Output one of the destinations", "Output: [cafe]")
                .with_rule("rate the importance", "3"),
        );
        let embodiment = Arc::new(RecordingEmbodiment::new());
        let ctx = context(Arc::clone(&reasoner), embodiment.clone(), AgentRegistry::new(), cafe_map());
        let mut ada = agent("Ada", "brewing coffee", dir.path(), reasoner).await;

        let outcome = ada.step(&ctx, 8 * 60, &[]).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Idle);
        assert_eq!(outcome.events, vec![Event::new("Ada", "coffee", "brewing coffee")]);
        assert!(outcome.debrief.is_none());
        assert_eq!(ada.memory().len(), 1);
        let node = ada.memory().nodes().first().unwrap();
        assert_eq!(node.predicate, "brew");
        assert_eq!(ada.destination(), Some("cafe"));
        assert!(matches!(
            embodiment.commands().first(),
            Some(Command::Navigate { agent, .. }) if agent == "Ada"
        ));
    }

    #[tokio::test]
    async fn failing_reasoner_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let reasoner: Arc<dyn Reasoner> = Arc::new(FailingReasoner::unavailable());
        let ctx = context(
            Arc::clone(&reasoner),
            Arc::new(RecordingEmbodiment::new()),
            AgentRegistry::new(),
            cafe_map(),
        );
        let mut ada = agent("Ada", "reading", dir.path(), reasoner).await;

        let outcome = ada.step(&ctx, 9 * 60, &[]).await.unwrap();

        assert_eq!(outcome.events, vec![Event::new("Ada", "reading", "reading")]);
        assert_eq!(ada.destination(), None);
    }

    #[tokio::test]
    async fn unknown_subject_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let reasoner: Arc<dyn Reasoner> = Arc::new(ScriptedReasoner::new("No"));
        let ctx = context(
            Arc::clone(&reasoner),
            Arc::new(RecordingEmbodiment::new()),
            AgentRegistry::new(),
            WorldMap::default(),
        );
        let mut ada = agent("Ada", "reading", dir.path(), reasoner).await;
        let snapshot = [Event::new("Ghost", "door", "rattling the door")];

        let result = ada.step(&ctx, 9 * 60, &snapshot).await;

        assert!(matches!(
            result,
            Err(BehaviorError::UnknownAgentReference { subject, .. }) if subject == "Ghost"
        ));
    }

    #[tokio::test]
    async fn sleeping_and_own_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = Arc::new(ScriptedReasoner::new("No"));
        let reasoner: Arc<dyn Reasoner> = scripted.clone();
        let ctx = context(
            Arc::clone(&reasoner),
            Arc::new(RecordingEmbodiment::new()),
            AgentRegistry::new(),
            WorldMap::default(),
        );
        let mut ada = agent("Ada", "reading", dir.path(), reasoner).await;
        let snapshot = [
            Event::new("Ada", "book", "reading"),
            Event::new("Bob", "sleep", "sleeping"),
        ];

        let outcome = ada.step(&ctx, 9 * 60, &snapshot).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Idle);
        assert_eq!(scripted.calls_containing("start a conversation with"), 0);
    }

    /// Replies for a whole conversation between Ada and Bob.
    fn talker() -> Arc<ScriptedReasoner> {
        Arc::new(
            ScriptedReasoner::new("No")
                .with_rule("Output one of the destinations", "Output: [cafe]")
                .with_rule("start a conversation with", "Yes")
                .with_rule("What would they talk about?", "Topic: the weather.")
                .with_rule("say hello to", "\"Good morning!\"")
                .with_rule("respond to", "\"Sure, see you there\"")
                .with_rule("Summarize the conversation", "Ada and Bob talked about the weather."),
        )
    }

    fn talk_context(scripted: &Arc<ScriptedReasoner>) -> BehaviorContext {
        context(
            scripted.clone(),
            Arc::new(RecordingEmbodiment::new()),
            AgentRegistry::new(),
            cafe_map(),
        )
    }

    fn location_prompts(scripted: &ScriptedReasoner) -> Vec<String> {
        scripted
            .calls()
            .into_iter()
            .map(|call| call.prompt)
            .filter(|prompt| prompt.contains("Output one of the destinations"))
            .collect()
    }

    #[tokio::test]
    async fn conversation_decides_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = talker();
        let mut registry = AgentRegistry::new();
        registry
            .register(agent("Bob", "brewing coffee", dir.path(), scripted.clone()).await)
            .unwrap();
        let ctx = context(
            scripted.clone(),
            Arc::new(RecordingEmbodiment::new()),
            registry,
            cafe_map(),
        );
        let mut ada = agent("Ada", "reading", dir.path(), scripted.clone()).await;
        let snapshot = [Event::new("Bob", "coffee", "brewing coffee")];

        let outcome = ada.step(&ctx, 9 * 60, &snapshot).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Speaking);
        let prompts = location_prompts(&scripted);
        assert_eq!(prompts.len(), 1);
        let prompt = prompts.first().unwrap();
        assert!(prompt.contains(
            "Current action: Ada is talking to Bob about the weather said Good morning!."
        ));
        assert!(!prompt.contains("Current action: reading"));
    }

    #[tokio::test]
    async fn turn_holder_speaks_and_passes_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = talker();
        let ctx = talk_context(&scripted);
        ctx.conversations
            .open("Bob", "Ada", "the weather", "Lovely day.")
            .unwrap();
        let mut ada = agent("Ada", "reading", dir.path(), scripted.clone()).await;

        let outcome = ada.step(&ctx, 9 * 60, &[]).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Speaking);
        assert_eq!(
            outcome.events,
            vec![Event::new(
                "Ada",
                "Bob",
                "Ada is talking to Bob about the weather said Sure, see you there."
            )]
        );
        let conversation = ctx.conversations.view("Ada").conversation.unwrap();
        assert_eq!(conversation.turn_holder, "Bob");
        assert_eq!(conversation.transcript.len(), 2);
        assert!(outcome.debrief.is_none());
        assert!(
            location_prompts(&scripted)
                .first()
                .unwrap()
                .contains("Current action: Ada is talking to Bob about the weather")
        );
    }

    #[tokio::test]
    async fn listener_publishes_listening_and_claims_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = talker();
        let embodiment = Arc::new(RecordingEmbodiment::new());
        let ctx = context(
            scripted.clone(),
            embodiment.clone(),
            AgentRegistry::new(),
            WorldMap::default(),
        );
        ctx.conversations
            .open("Ada", "Bob", "the weather", "Lovely day.")
            .unwrap();
        let mut ada = agent("Ada", "reading", dir.path(), scripted.clone()).await;

        let outcome = ada.step(&ctx, 9 * 60, &[]).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Listening);
        assert_eq!(
            outcome.events,
            vec![Event::new(
                "Ada",
                "Bob",
                "Ada is Listening to Bob said about the weather."
            )]
        );
        let conversation = ctx.conversations.view("Ada").conversation.unwrap();
        assert_eq!(conversation.turn_holder, "Ada");
        assert_eq!(conversation.transcript.len(), 1);
        assert_eq!(scripted.calls_containing("respond to"), 0);
        assert!(embodiment.commands().iter().any(
            |command| matches!(command, Command::Stare { agent, .. } if agent == "Ada")
        ));
    }

    #[tokio::test]
    async fn listener_concludes_at_the_listen_bound() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = talker();
        let ctx = talk_context(&scripted);
        let id = ctx
            .conversations
            .open("Ada", "Bob", "the weather", "Lovely day.")
            .unwrap();
        for speaker in ["Bob", "Ada", "Bob", "Ada"] {
            ctx.conversations
                .record_utterance(id, speaker, "Indeed.")
                .unwrap();
        }
        // Five lines with Bob holding the turn: past the listen bound,
        // short of the speak bound.
        let mut ada = agent("Ada", "reading", dir.path(), scripted.clone()).await;

        let outcome = ada.step(&ctx, 9 * 60, &[]).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Concluding);
        assert!(outcome.events.is_empty());
        let debrief = outcome.debrief.unwrap();
        assert_eq!(debrief.participant, "Bob");
        assert_eq!(debrief.counterpart, "Ada");
        assert_eq!(debrief.transcript.len(), 5);
        assert_eq!(debrief.summary, "Ada and Bob talked about the weather.");
        for name in ["Ada", "Bob"] {
            let view = ctx.conversations.view(name);
            assert!(!view.in_conversation());
            assert!(view.chatted_today);
        }
        let node = ada.memory().nodes().first().unwrap();
        assert_eq!(node.predicate, TALKS_TO);
        assert_eq!(node.object, "Bob");
    }

    #[tokio::test]
    async fn custom_bounds_are_separate_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let scripted = talker();
        let mut ctx = talk_context(&scripted);
        ctx.settings.speak_bound = 4;
        ctx.settings.listen_bound = 2;
        let mut ada = agent("Ada", "reading", dir.path(), scripted.clone()).await;
        let mut bob = agent("Bob", "brewing coffee", dir.path(), scripted.clone()).await;

        let id = ctx
            .conversations
            .open("Ada", "Bob", "the weather", "Lovely day.")
            .unwrap();
        ctx.conversations.record_utterance(id, "Bob", "Indeed.").unwrap();
        ctx.conversations.record_utterance(id, "Ada", "Quite.").unwrap();

        // Three lines: the holder is still under the speak bound.
        let spoke = bob.step(&ctx, 9 * 60, &[]).await.unwrap();
        assert_eq!(spoke.state, BehaviorState::Speaking);

        // Four lines: the holder has reached the speak bound.
        let closed = ada.step(&ctx, 9 * 60, &[]).await.unwrap();
        assert_eq!(closed.state, BehaviorState::Concluding);
        assert_eq!(closed.debrief.unwrap().transcript.len(), 4);

        // Two lines: a listener past the listen bound concludes instead of
        // listening.
        let id = ctx
            .conversations
            .open("Ada", "Bob", "the picnic", "Shall we?")
            .unwrap();
        ctx.conversations.record_utterance(id, "Bob", "Gladly.").unwrap();
        let closed = bob.step(&ctx, 9 * 60, &[]).await.unwrap();
        assert_eq!(closed.state, BehaviorState::Concluding);
        let debrief = closed.debrief.unwrap();
        assert_eq!(debrief.participant, "Ada");
        assert_eq!(debrief.transcript.len(), 2);
    }

    /// Concludes the asking agent's conversation while it is still
    /// generating its reply.
    struct InterruptingReasoner {
        inner: ScriptedReasoner,
        ctx: OnceLock<Weak<BehaviorContext>>,
    }

    #[async_trait]
    impl Reasoner for InterruptingReasoner {
        async fn complete(
            &self,
            session: &SessionKey,
            prompt: &str,
            params: SamplingParams,
        ) -> Result<String, ServiceError> {
            if prompt.contains("respond to")
                && let Some(ctx) = self.ctx.get().and_then(Weak::upgrade)
                && let Some(conversation) = ctx.conversations.view(&session.participant).conversation
            {
                ctx.conversations.conclude(conversation.id);
            }
            self.inner.complete(session, prompt, params).await
        }

        fn name(&self) -> &str {
            "interrupting"
        }
    }

    #[tokio::test]
    async fn interrupted_speaker_stays_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let interrupting = Arc::new(InterruptingReasoner {
            inner: ScriptedReasoner::new("No")
                .with_rule("respond to", "\"Sure, see you there\"")
                .with_rule("into (subject, object)", "(Ada, book)"),
            ctx: OnceLock::new(),
        });
        let ctx = Arc::new(context(
            interrupting.clone(),
            Arc::new(RecordingEmbodiment::new()),
            AgentRegistry::new(),
            WorldMap::default(),
        ));
        interrupting.ctx.set(Arc::downgrade(&ctx)).unwrap();
        ctx.conversations
            .open("Bob", "Ada", "the weather", "Lovely day.")
            .unwrap();
        let mut ada = agent(
            "Ada",
            "reading",
            dir.path(),
            Arc::new(ScriptedReasoner::new("3")),
        )
        .await;

        let outcome = ada.step(&ctx, 9 * 60, &[]).await.unwrap();

        assert_eq!(outcome.state, BehaviorState::Idle);
        assert_eq!(outcome.events, vec![Event::new("Ada", "book", "reading")]);
        assert!(outcome.debrief.is_none());
        assert!(!ctx.conversations.view("Ada").in_conversation());
    }
}
