//! Timeouts, retries, and a circuit breaker around a reasoner.
//!
//! [`ResilientReasoner`] wraps any [`Reasoner`]. Each attempt runs under a
//! deadline; unavailable or timed-out attempts are retried with
//! exponential backoff; after enough consecutive failed calls the breaker
//! opens and every call fails fast with [`ServiceError::CircuitOpen`]
//! until the cooldown elapses. Callers treat any error as a reason to take
//! the mundane path for the tick.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use township_types::{Reasoner, SamplingParams, ServiceError, SessionKey};
use tracing::{debug, warn};

/// Retry and breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
    /// Consecutive failed calls that open the breaker.
    pub breaker_threshold: u32,
    /// How long the breaker stays open.
    pub breaker_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff: Duration::from_millis(500),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct Breaker {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// A [`Reasoner`] that adds deadlines, retries, and a circuit breaker.
pub struct ResilientReasoner {
    inner: Arc<dyn Reasoner>,
    policy: RetryPolicy,
    breaker: Mutex<Breaker>,
}

impl core::fmt::Debug for ResilientReasoner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResilientReasoner")
            .field("inner", &self.inner.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientReasoner {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn Reasoner>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            breaker: Mutex::new(Breaker::default()),
        }
    }

    /// Whether calls are currently short-circuited.
    pub fn is_open(&self) -> bool {
        let breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        breaker.open_until.is_some_and(|until| Instant::now() < until)
    }

    fn record_success(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        breaker.consecutive_failures = 0;
        breaker.open_until = None;
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(PoisonError::into_inner);
        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        if breaker.consecutive_failures >= self.policy.breaker_threshold {
            breaker.open_until = Instant::now().checked_add(self.policy.breaker_cooldown);
            breaker.consecutive_failures = 0;
            warn!(
                service = self.inner.name(),
                cooldown_ms = u64::try_from(self.policy.breaker_cooldown.as_millis()).unwrap_or(u64::MAX),
                "circuit breaker opened"
            );
        }
    }

    async fn attempt(
        &self,
        session: &SessionKey,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError> {
        match tokio::time::timeout(
            self.policy.timeout,
            self.inner.complete(session, prompt, params),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(ServiceError::Timeout {
                service: self.inner.name().to_owned(),
                after_ms: u64::try_from(self.policy.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[async_trait]
impl Reasoner for ResilientReasoner {
    async fn complete(
        &self,
        session: &SessionKey,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, ServiceError> {
        if self.is_open() {
            return Err(ServiceError::CircuitOpen {
                service: self.inner.name().to_owned(),
            });
        }

        let mut delay = self.policy.backoff;
        let mut retries_left = self.policy.max_retries;
        loop {
            match self.attempt(session, prompt, params).await {
                Ok(reply) => {
                    self.record_success();
                    return Ok(reply);
                }
                Err(error) if error.is_retryable() && retries_left > 0 => {
                    debug!(%session, %error, retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "retrying completion");
                    retries_left = retries_left.saturating_sub(1);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(error) => {
                    self.record_failure();
                    return Err(error);
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use township_types::testkit::{FailingReasoner, ScriptedReasoner};

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(100),
            max_retries: 2,
            backoff: Duration::from_millis(10),
            breaker_threshold: 2,
            breaker_cooldown: Duration::from_secs(60),
        }
    }

    /// Fails the first `failures` calls, then answers "ok".
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Reasoner for Flaky {
        async fn complete(
            &self,
            _session: &SessionKey,
            _prompt: &str,
            _params: SamplingParams,
        ) -> Result<String, ServiceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ServiceError::Unavailable {
                    service: "flaky".to_owned(),
                    message: "down".to_owned(),
                })
            } else {
                Ok("ok".to_owned())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    /// Never answers.
    struct Hanging;

    #[async_trait]
    impl Reasoner for Hanging {
        async fn complete(
            &self,
            _session: &SessionKey,
            _prompt: &str,
            _params: SamplingParams,
        ) -> Result<String, ServiceError> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let reasoner = ResilientReasoner::new(flaky.clone(), policy());
        let reply = reasoner
            .complete(&SessionKey::shared(), "hi", SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert!(!reasoner.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_time_out() {
        let reasoner = ResilientReasoner::new(Arc::new(Hanging), policy());
        let result = reasoner
            .complete(&SessionKey::shared(), "hi", SamplingParams::default())
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout { after_ms: 100, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_then_recovers_after_cooldown() {
        let failing = Arc::new(FailingReasoner::unavailable());
        let reasoner = ResilientReasoner::new(failing.clone(), policy());
        let session = SessionKey::shared();

        for _ in 0..2 {
            assert!(reasoner.complete(&session, "hi", SamplingParams::default()).await.is_err());
        }
        // Two calls, three attempts each.
        assert_eq!(failing.attempts(), 6);
        assert!(reasoner.is_open());

        let short_circuited = reasoner.complete(&session, "hi", SamplingParams::default()).await;
        assert!(matches!(short_circuited, Err(ServiceError::CircuitOpen { .. })));
        assert_eq!(failing.attempts(), 6);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!reasoner.is_open());
        assert!(reasoner.complete(&session, "hi", SamplingParams::default()).await.is_err());
        assert_eq!(failing.attempts(), 9);
    }

    #[tokio::test]
    async fn malformed_is_not_retried() {
        let failing = Arc::new(FailingReasoner::new(ServiceError::Malformed {
            service: "x".to_owned(),
            message: "no choices".to_owned(),
        }));
        let reasoner = ResilientReasoner::new(failing.clone(), policy());
        assert!(reasoner
            .complete(&SessionKey::shared(), "hi", SamplingParams::default())
            .await
            .is_err());
        assert_eq!(failing.attempts(), 1);
    }

    #[tokio::test]
    async fn passes_replies_through() {
        let reasoner = ResilientReasoner::new(Arc::new(ScriptedReasoner::new("Yes")), policy());
        assert_eq!(reasoner.name(), "scripted");
        let reply = reasoner
            .complete(&SessionKey::for_agent("Ada"), "hi", SamplingParams::default())
            .await
            .unwrap();
        assert_eq!(reply, "Yes");
    }
}
