//! End-to-end behavior of the tick loop with scripted services.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use township_core::agent::{Agent, BehaviorContext, BehaviorSettings, BehaviorState, TALKS_TO};
use township_core::clock::SimClock;
use township_core::conversation::ConversationManager;
use township_core::embodiment::{Command, Embodiment, RecordingEmbodiment};
use township_core::planner::Planner;
use township_core::prompt::PromptEngine;
use township_core::registry::{AgentRegistry, RegistryError};
use township_core::schedule::DailySchedule;
use township_core::scheduler::{
    EndReason, Scheduler, SchedulerError, TickObserver, TickSummary,
};
use township_core::shutdown::Shutdown;
use township_core::world::WorldMap;
use township_memory::{MemoryConfig, MemoryStore};
use township_types::testkit::{FixedEmbedder, ScriptedReasoner};
use township_types::{Event, Reasoner, SamplingParams, ScheduleEntry, ServiceError, SessionKey};

const EIGHT_AM: u32 = 480;

fn day(activity: &str) -> DailySchedule {
    DailySchedule::from_entries(vec![
        ScheduleEntry::new("sleeping", 420),
        ScheduleEntry::new(activity, 1020),
    ])
    .unwrap()
}

async fn agent(name: &str, activity: &str, dir: &Path, reasoner: Arc<dyn Reasoner>) -> Agent {
    let memory = MemoryStore::open(
        name,
        dir,
        reasoner,
        Arc::new(FixedEmbedder::new(4)),
        MemoryConfig::default(),
    )
    .await
    .unwrap();
    let persona = format!("Name: {name}\nLifestyle: {name} wakes up at 7 am.\nCurrently: {name} is {activity}.\n");
    Agent::new(name, persona, day(activity), memory, 42)
}

async fn context(
    reasoner: Arc<dyn Reasoner>,
    embodiment: Arc<dyn Embodiment>,
    dir: &Path,
    agents: &[(&str, &str)],
) -> BehaviorContext {
    let mut registry = AgentRegistry::new();
    for (name, activity) in agents {
        registry
            .register(agent(name, activity, dir, Arc::clone(&reasoner)).await)
            .unwrap();
    }
    let prompts = Arc::new(PromptEngine::builtin().unwrap());
    BehaviorContext {
        registry,
        conversations: ConversationManager::new(),
        planner: Planner::new(
            Arc::clone(&reasoner),
            Arc::clone(&prompts),
            SamplingParams::default(),
        ),
        reasoner,
        embodiment,
        prompts,
        world: WorldMap::default(),
        settings: BehaviorSettings::default(),
    }
}

/// Mundane extraction rules that make each agent publish events about
/// itself.
fn townsfolk() -> ScriptedReasoner {
    ScriptedReasoner::new("No")
        .with_rule("into (subject, predicate, object)", "(someone, do, something)")
        .with_rule("Input: Ada is", "(Ada, coffee)")
        .with_rule("Input: Bob is", "(Bob, book)")
}

fn chatty(reasoner: ScriptedReasoner) -> ScriptedReasoner {
    reasoner
        .with_rule("start a conversation with", "Yes")
        .with_rule("What would they talk about?", "Topic: the morning coffee.")
        .with_rule("say hello to", "Ada said: \"Good morning!\" and waved")
        .with_rule("respond to", "\"Sounds good.\"")
        .with_rule("Summarize the conversation", "They talked about the morning coffee.")
}

#[derive(Clone, Default)]
struct Recorder {
    ticks: Arc<Mutex<Vec<TickSummary>>>,
}

impl TickObserver for Recorder {
    fn on_tick(&mut self, summary: &TickSummary) {
        self.ticks.lock().unwrap().push(*summary);
    }
}

#[tokio::test]
async fn events_become_visible_one_tick_later() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(townsfolk());
    let ctx = context(
        reasoner.clone(),
        Arc::new(RecordingEmbodiment::new()),
        dir.path(),
        &[("Ada", "brewing coffee"), ("Bob", "reading")],
    )
    .await;
    let mut scheduler = Scheduler::new(ctx, SimClock::new(EIGHT_AM, 5).unwrap(), Duration::ZERO).unwrap();

    let first = scheduler.run_tick().await;
    assert_eq!(first.events_published, 2);
    assert_eq!(first.failures, 0);
    // Nothing was visible during the first tick.
    assert_eq!(reasoner.calls_containing("start a conversation with"), 0);
    let visible = scheduler.bus().snapshot();
    assert!(visible.contains(&Event::new("Ada", "coffee", "brewing coffee")));
    assert!(visible.contains(&Event::new("Bob", "book", "reading")));

    scheduler.run_tick().await;
    // Each agent saw the other's event from the previous tick.
    assert_eq!(reasoner.calls_containing("start a conversation with"), 2);
    assert_eq!(scheduler.clock().minute(), EIGHT_AM + 10);
}

#[tokio::test]
async fn reaction_yes_opens_a_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(chatty(townsfolk()));
    let embodiment = Arc::new(RecordingEmbodiment::new());
    let ctx = context(
        reasoner.clone(),
        embodiment.clone(),
        dir.path(),
        &[("Ada", "reading"), ("Bob", "brewing coffee")],
    )
    .await;
    let snapshot = [Event::new("Bob", "coffee", "brewing coffee")];

    let outcome = {
        let mut ada = ctx.registry.get("Ada").unwrap().lock().await;
        ada.step(&ctx, EIGHT_AM, &snapshot).await.unwrap()
    };

    assert_eq!(outcome.state, BehaviorState::Speaking);
    assert_eq!(outcome.events.len(), 1);
    let event = outcome.events.first().unwrap();
    assert_eq!(event.subject, "Ada");
    assert_eq!(event.object, "Bob");
    assert!(event.description.contains("talking to"));
    assert!(event.description.contains("Good morning!"));

    let ada = ctx.conversations.view("Ada");
    let bob = ctx.conversations.view("Bob");
    assert!(ada.in_conversation());
    assert!(bob.in_conversation());
    assert!(bob.has_turn("Bob"));
    assert!(!ada.has_turn("Ada"));
    let conversation = ada.conversation.unwrap();
    assert_eq!(conversation.topic, "the morning coffee");
    assert_eq!(conversation.transcript.len(), 1);
    assert!(embodiment.commands().contains(&Command::Say {
        agent: "Ada".to_owned(),
        text: "Good morning!".to_owned(),
    }));
    // The observation itself was remembered.
    let ada = ctx.registry.get("Ada").unwrap().lock().await;
    assert!(ada.memory().nodes().iter().any(|n| n.description == "brewing coffee"));
}

#[tokio::test]
async fn conversations_conclude_within_bounded_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(chatty(townsfolk()));
    let ctx = context(
        reasoner.clone(),
        Arc::new(RecordingEmbodiment::new()),
        dir.path(),
        &[("Ada", "brewing coffee"), ("Bob", "reading")],
    )
    .await;
    let recorder = Recorder::default();
    let mut scheduler = Scheduler::new(ctx, SimClock::new(EIGHT_AM, 5).unwrap(), Duration::ZERO)
        .unwrap()
        .with_observer(Box::new(recorder.clone()));

    let run = scheduler.run_ticks(24).await;

    assert_eq!(run.end_reason, EndReason::TickLimit);
    assert_eq!(run.ticks, 24);
    let ctx = scheduler.context();
    assert_eq!(ctx.conversations.active_count(), 0);
    for name in ["Ada", "Bob"] {
        let view = ctx.conversations.view(name);
        assert!(!view.in_conversation());
        assert!(view.chatted_today);
        let agent = ctx.registry.get(name).unwrap().lock().await;
        assert_eq!(agent.state(), BehaviorState::Idle);
        // Both participants remember the conversation.
        assert!(agent.memory().nodes().iter().any(|n| n.predicate == TALKS_TO));
    }
    let ticks = recorder.ticks.lock().unwrap();
    assert_eq!(ticks.iter().map(|t| t.debriefs_applied).sum::<usize>(), 1);
    assert!(ticks.iter().all(|t| t.failures == 0));
}

#[tokio::test]
async fn unknown_subject_fails_only_that_agent() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(
        ScriptedReasoner::new("No")
            .with_rule("into (subject, predicate, object)", "(someone, do, something)")
            .with_rule("Input: Ada is", "(Ghost, coffee)")
            .with_rule("Input: Bob is", "(Bob, book)"),
    );
    let ctx = context(
        reasoner,
        Arc::new(RecordingEmbodiment::new()),
        dir.path(),
        &[("Ada", "brewing coffee"), ("Bob", "reading")],
    )
    .await;
    let mut scheduler = Scheduler::new(ctx, SimClock::new(EIGHT_AM, 5).unwrap(), Duration::ZERO).unwrap();

    scheduler.run_tick().await;
    let second = scheduler.run_tick().await;

    // Bob only sees the Ghost event and fails; Ada carries on.
    assert_eq!(second.failures, 1);
    assert_eq!(second.events_published, 1);
    assert_eq!(
        scheduler.bus().snapshot().first(),
        Some(&Event::new("Ghost", "coffee", "brewing coffee"))
    );
}

/// Panics whenever Bob asks anything.
struct PanicsForBob(ScriptedReasoner);

#[async_trait]
impl Reasoner for PanicsForBob {
    async fn complete(
        &self,
        session: &SessionKey,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError> {
        if session.participant == "Bob" {
            panic!("reasoner blew up");
        }
        self.0.complete(session, prompt, params).await
    }

    fn name(&self) -> &str {
        "panics-for-bob"
    }
}

#[tokio::test]
async fn panicking_agent_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner = Arc::new(PanicsForBob(townsfolk()));
    let ctx = context(
        reasoner,
        Arc::new(RecordingEmbodiment::new()),
        dir.path(),
        &[("Ada", "brewing coffee"), ("Bob", "reading")],
    )
    .await;
    let mut scheduler = Scheduler::new(ctx, SimClock::new(EIGHT_AM, 5).unwrap(), Duration::ZERO).unwrap();

    for _ in 0..2 {
        let summary = scheduler.run_tick().await;
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.events_published, 1);
    }
}

struct StopAfter {
    shutdown: Shutdown,
    remaining: u32,
}

impl TickObserver for StopAfter {
    fn on_tick(&mut self, _summary: &TickSummary) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.shutdown.request();
        }
    }
}

#[tokio::test]
async fn shutdown_drains_the_running_tick() {
    let dir = tempfile::tempdir().unwrap();
    let embodiment = Arc::new(RecordingEmbodiment::new());
    let ctx = context(
        Arc::new(townsfolk()),
        embodiment.clone(),
        dir.path(),
        &[("Ada", "brewing coffee")],
    )
    .await;
    let shutdown = Shutdown::new();
    let mut scheduler = Scheduler::new(
        ctx,
        SimClock::new(EIGHT_AM, 5).unwrap(),
        Duration::from_millis(10),
    )
    .unwrap()
    .with_shutdown(shutdown.clone())
    .with_observer(Box::new(StopAfter {
        shutdown,
        remaining: 3,
    }));

    let run = scheduler.start().await;

    assert_eq!(run.end_reason, EndReason::Shutdown);
    assert_eq!(run.ticks, 3);
    assert_eq!(run.final_summary.map(|s| s.tick), Some(2));
    let syncs = embodiment
        .commands()
        .into_iter()
        .filter(|c| matches!(c, Command::SyncClock(_)))
        .count();
    assert_eq!(syncs, 3);
}

#[tokio::test]
async fn day_wrap_resets_conversations_of_the_day() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Arc::new(townsfolk()),
        Arc::new(RecordingEmbodiment::new()),
        dir.path(),
        &[("Ada", "brewing coffee"), ("Bob", "reading")],
    )
    .await;
    let id = ctx.conversations.open("Ada", "Bob", "tea", "hi").unwrap();
    ctx.conversations.conclude(id).unwrap();
    assert!(ctx.conversations.view("Ada").chatted_today);

    let mut scheduler = Scheduler::new(ctx, SimClock::new(1435, 5).unwrap(), Duration::ZERO).unwrap();
    let summary = scheduler.run_tick().await;

    assert_eq!(summary.minute, 1435);
    assert_eq!(scheduler.clock().minute(), 0);
    assert!(!scheduler.context().conversations.view("Ada").chatted_today);
}

#[tokio::test]
async fn scheduler_needs_agents() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        Arc::new(townsfolk()),
        Arc::new(RecordingEmbodiment::new()),
        dir.path(),
        &[],
    )
    .await;
    let result = Scheduler::new(ctx, SimClock::new(0, 5).unwrap(), Duration::ZERO);
    assert!(matches!(result, Err(SchedulerError::NoAgents)));
}

#[tokio::test]
async fn registry_rejects_duplicates_and_keeps_order() {
    let dir = tempfile::tempdir().unwrap();
    let reasoner: Arc<dyn Reasoner> = Arc::new(townsfolk());
    let mut registry = AgentRegistry::new();
    registry
        .register(agent("Bob", "reading", dir.path(), Arc::clone(&reasoner)).await)
        .unwrap();
    registry
        .register(agent("Ada", "brewing coffee", dir.path(), Arc::clone(&reasoner)).await)
        .unwrap();

    let duplicate = registry.register(agent("Ada", "napping", dir.path(), reasoner).await);

    assert_eq!(
        duplicate.err(),
        Some(RegistryError::Duplicate {
            name: "Ada".to_owned()
        })
    );
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Bob", "Ada"]);
    assert_eq!(registry.len(), 2);
    assert!(registry.contains("Ada"));
    assert!(registry.get("Cid").is_none());
}
