//! The tick loop.
//!
//! Each tick:
//!
//! 1. tell the embodiment controller the time of day,
//! 2. run every agent's behavior step as its own task,
//! 3. wait for all of them (failures and panics are isolated per agent),
//! 4. apply conversation debriefs, publish the tick's events, and swap the
//!    event buffers,
//! 5. pause for the configured interval,
//! 6. advance the simulated clock.
//!
//! Stopping is cooperative: the [`Shutdown`] handle is checked before each
//! tick and interrupts the pause, but a tick that has started always
//! finishes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::agent::{BehaviorContext, TickOutcome};
use crate::clock::{self, SimClock};
use crate::event_bus::EventBus;
use crate::shutdown::Shutdown;

/// Errors from building a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// There is nobody to simulate.
    #[error("no agents registered")]
    NoAgents,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Zero-based tick number.
    pub tick: u64,
    /// Simulated minute the tick ran at.
    pub minute: u32,
    /// Events published for the next tick.
    pub events_published: usize,
    /// Agents whose step failed or panicked.
    pub failures: usize,
    /// Conversation debriefs applied after the barrier.
    pub debriefs_applied: usize,
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// A stop was requested.
    Shutdown,
    /// The requested number of ticks ran.
    TickLimit,
}

/// Result of [`Scheduler::start`] or [`Scheduler::run_ticks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Why the run ended.
    pub end_reason: EndReason,
    /// Ticks executed.
    pub ticks: u64,
    /// The last tick, if any ran.
    pub final_summary: Option<TickSummary>,
}

/// Callback invoked after every tick.
pub trait TickObserver: Send {
    /// Called once the tick's events are published.
    fn on_tick(&mut self, summary: &TickSummary);
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl TickObserver for NoOpObserver {
    fn on_tick(&mut self, _summary: &TickSummary) {}
}

/// Drives every agent through simulated time.
pub struct Scheduler {
    context: Arc<BehaviorContext>,
    clock: SimClock,
    bus: EventBus,
    pacing: Duration,
    shutdown: Shutdown,
    observer: Box<dyn TickObserver>,
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("context", &self.context)
            .field("clock", &self.clock)
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create a scheduler over the agents registered in `context`.
    pub fn new(
        context: BehaviorContext,
        clock: SimClock,
        pacing: Duration,
    ) -> Result<Self, SchedulerError> {
        if context.registry.is_empty() {
            return Err(SchedulerError::NoAgents);
        }
        Ok(Self {
            context: Arc::new(context),
            clock,
            bus: EventBus::new(),
            pacing,
            shutdown: Shutdown::new(),
            observer: Box::new(NoOpObserver),
        })
    }

    /// Replace the tick observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn TickObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an existing stop signal.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// A handle that stops the loop when requested.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Shared behavior context, including the registry.
    pub const fn context(&self) -> &Arc<BehaviorContext> {
        &self.context
    }

    /// The simulated clock.
    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// The event bus.
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run until a stop is requested.
    pub async fn start(&mut self) -> RunSummary {
        self.run(None).await
    }

    /// Run at most `ticks` ticks, or until a stop is requested.
    pub async fn run_ticks(&mut self, ticks: u64) -> RunSummary {
        self.run(Some(ticks)).await
    }

    /// Run a single tick without pausing afterwards.
    pub async fn run_tick(&mut self) -> TickSummary {
        let summary = self.execute().await;
        self.observer.on_tick(&summary);
        self.advance_clock();
        summary
    }

    async fn run(&mut self, limit: Option<u64>) -> RunSummary {
        let mut ticks: u64 = 0;
        let mut final_summary = None;
        info!(
            agents = self.context.registry.len(),
            start = %self.clock.label(),
            pacing_ms = u64::try_from(self.pacing.as_millis()).unwrap_or(u64::MAX),
            limit,
            "simulation starting"
        );

        let end_reason = loop {
            if self.shutdown.is_requested() {
                break EndReason::Shutdown;
            }
            if limit.is_some_and(|limit| ticks >= limit) {
                break EndReason::TickLimit;
            }

            let summary = self.execute().await;
            self.observer.on_tick(&summary);
            ticks = ticks.saturating_add(1);
            final_summary = Some(summary);

            let interrupted = if limit.is_some_and(|limit| ticks >= limit) {
                false
            } else {
                self.shutdown.sleep(self.pacing).await
            };
            self.advance_clock();
            if interrupted {
                break EndReason::Shutdown;
            }
        };

        info!(reason = ?end_reason, ticks, final_minute = %self.clock.label(), "simulation ended");
        RunSummary {
            end_reason,
            ticks,
            final_summary,
        }
    }

    /// Sync, fan out, barrier, debriefs, publish.
    async fn execute(&mut self) -> TickSummary {
        let tick = self.clock.tick();
        let minute = self.clock.minute();

        if let Err(e) = self
            .context
            .embodiment
            .sync_clock(clock::world_time(minute))
            .await
        {
            warn!(tick, error = %e, "clock sync failed");
        }

        let snapshot = self.bus.snapshot();
        let agent_count = self.context.registry.len();
        let mut tasks = JoinSet::new();
        let mut task_agents = HashMap::with_capacity(agent_count);
        for (index, (name, handle)) in self.context.registry.iter().enumerate() {
            let context = Arc::clone(&self.context);
            let handle = Arc::clone(handle);
            let snapshot = Arc::clone(&snapshot);
            let task = tasks.spawn(async move {
                let mut agent = handle.lock().await;
                agent.step(&context, minute, &snapshot).await
            });
            task_agents.insert(task.id(), (index, name.to_owned()));
        }

        let mut outcomes: Vec<Option<TickOutcome>> = vec![None; agent_count];
        let mut failures: usize = 0;
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(outcome))) => {
                    if let Some(slot) = task_agents
                        .get(&id)
                        .and_then(|(index, _)| outcomes.get_mut(*index))
                    {
                        *slot = Some(outcome);
                    }
                }
                Ok((id, Err(e))) => {
                    failures = failures.saturating_add(1);
                    let agent = task_agents.get(&id).map_or("?", |(_, name)| name.as_str());
                    warn!(agent, tick, error = %e, "agent step failed, contributing no events");
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let agent = task_agents
                        .get(&e.id())
                        .map_or("?", |(_, name)| name.as_str());
                    error!(agent, tick, error = %e, "agent step panicked, contributing no events");
                }
            }
        }

        let outcomes: Vec<TickOutcome> = outcomes.into_iter().flatten().collect();
        let debriefs_applied = self.apply_debriefs(&outcomes).await;

        for outcome in outcomes {
            self.bus.publish_all(outcome.events);
        }
        let events_published = self.bus.advance();

        let summary = TickSummary {
            tick,
            minute,
            events_published,
            failures,
            debriefs_applied,
        };
        info!(
            tick,
            minute = %clock::label(minute),
            events = events_published,
            failures,
            debriefs = debriefs_applied,
            "tick complete"
        );
        summary
    }

    async fn apply_debriefs(&self, outcomes: &[TickOutcome]) -> usize {
        let mut applied: usize = 0;
        for debrief in outcomes.iter().filter_map(|o| o.debrief.as_ref()) {
            let Some(handle) = self.context.registry.get(&debrief.participant) else {
                warn!(agent = %debrief.participant, "debrief for unknown agent dropped");
                continue;
            };
            let mut agent = handle.lock().await;
            match agent.absorb_debrief(&self.context, debrief).await {
                Ok(()) => applied = applied.saturating_add(1),
                Err(e) => {
                    warn!(agent = %debrief.participant, error = %e, "debrief failed");
                }
            }
        }
        applied
    }

    fn advance_clock(&mut self) {
        if self.clock.advance() {
            debug!("day wrapped, resetting conversations of the day");
            self.context.conversations.reset_day();
        }
    }
}
