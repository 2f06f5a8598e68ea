//! Execution coordinator: one delegated call, bounded retry, ordered fallback.
//!
//! The first candidate gets up to `max_attempts` tries, with exponential
//! backoff between transient failures. Every later candidate gets exactly one
//! try. The default agent closes the list if the caller did not include it.
//!
//! The sequence is driven by [`FallbackMachine`]:
//!
//! ```text
//! Selected -> Attempting(i, n) -> Succeeded(i)
//!                              -> Retrying(i, n+1) -> Attempting(i, n+1)
//!                              -> FallingBack(i, i+1) -> Attempting(i+1, 1)
//!                              -> Exhausted
//! ```

use crate::agent::{AgentCall, AgentProfile, CallError, Payload};
use crate::events::{EventSink, OrchestrationEvent};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Retry and backoff settings for the first candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts on the first candidate, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based):
    /// `base * factor^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// Where a fallback sequence stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackState {
    Selected,
    Attempting { candidate: usize, attempt: u32 },
    Retrying { candidate: usize, attempt: u32, delay: Duration },
    FallingBack { from: usize, to: usize },
    Succeeded { candidate: usize },
    Exhausted,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FallbackState::Succeeded { .. } | FallbackState::Exhausted)
    }
}

/// Finite state machine for one delegated call across its candidates.
///
/// Inputs that do not apply to the current state leave it unchanged.
#[derive(Debug, Clone)]
pub struct FallbackMachine {
    candidates: usize,
    policy: RetryPolicy,
    state: FallbackState,
}

impl FallbackMachine {
    pub fn new(candidates: usize, policy: RetryPolicy) -> Self {
        Self {
            candidates,
            policy,
            state: FallbackState::Selected,
        }
    }

    pub fn state(&self) -> &FallbackState {
        &self.state
    }

    /// `Selected -> Attempting(0, 1)`, or `Exhausted` with no candidates.
    pub fn start(&mut self) -> &FallbackState {
        if self.state == FallbackState::Selected {
            self.state = if self.candidates == 0 {
                FallbackState::Exhausted
            } else {
                FallbackState::Attempting {
                    candidate: 0,
                    attempt: 1,
                }
            };
        }
        &self.state
    }

    pub fn on_success(&mut self) -> &FallbackState {
        if let FallbackState::Attempting { candidate, .. } = self.state {
            self.state = FallbackState::Succeeded { candidate };
        }
        &self.state
    }

    pub fn on_failure(&mut self, transient: bool) -> &FallbackState {
        if let FallbackState::Attempting { candidate, attempt } = self.state {
            self.state = if candidate == 0 && transient && attempt < self.policy.max_attempts {
                FallbackState::Retrying {
                    candidate,
                    attempt: attempt + 1,
                    delay: self.policy.delay_for(attempt),
                }
            } else if candidate + 1 < self.candidates {
                FallbackState::FallingBack {
                    from: candidate,
                    to: candidate + 1,
                }
            } else {
                FallbackState::Exhausted
            };
        }
        &self.state
    }

    /// Leave `Retrying` or `FallingBack` for the next attempt.
    pub fn resume(&mut self) -> &FallbackState {
        self.state = match self.state {
            FallbackState::Retrying {
                candidate, attempt, ..
            } => FallbackState::Attempting { candidate, attempt },
            FallbackState::FallingBack { to, .. } => FallbackState::Attempting {
                candidate: to,
                attempt: 1,
            },
            ref other => other.clone(),
        };
        &self.state
    }
}

/// Why one candidate was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub agent: String,
    pub attempts: u32,
    /// The last error the candidate returned.
    pub error: CallError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plural = if self.attempts == 1 { "" } else { "s" };
        write!(
            f,
            "{} ({} attempt{}): {}",
            self.agent, self.attempts, plural, self.error
        )
    }
}

/// Every candidate, including the default agent, failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllAgentsExhausted {
    pub item: String,
    pub failures: Vec<CandidateFailure>,
}

impl AllAgentsExhausted {
    /// Agents tried, in order.
    pub fn agents(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.agent.as_str()).collect()
    }
}

impl fmt::Display for AllAgentsExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' failed: all {} candidate agents exhausted, fallback included",
            self.item,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AllAgentsExhausted {}

/// Result of a successful delegated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// The agent whose output this is; may not be the first candidate.
    pub agent: String,
    pub output: String,
    pub fallback_used: bool,
    /// Attempts made across all candidates.
    pub attempts: u32,
    /// Candidates that failed before the successful one.
    pub failures: Vec<CandidateFailure>,
}

/// Runs delegated calls with retry and fallback.
pub struct ExecutionCoordinator {
    call: Arc<dyn AgentCall>,
    policy: RetryPolicy,
    default_agent: AgentProfile,
    sink: Arc<dyn EventSink>,
}

impl ExecutionCoordinator {
    pub fn new(
        call: Arc<dyn AgentCall>,
        policy: RetryPolicy,
        default_agent: AgentProfile,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            call,
            policy,
            default_agent,
            sink,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// A single attempt against one agent, no retry and no fallback.
    pub async fn execute(
        &self,
        profile: &AgentProfile,
        payload: &Payload,
    ) -> Result<ExecutionOutcome, CallError> {
        let output = self.call.call(profile, payload).await?;
        Ok(ExecutionOutcome {
            agent: profile.name.clone(),
            output,
            fallback_used: false,
            attempts: 1,
            failures: Vec::new(),
        })
    }

    /// Try `candidates` in order, then the default agent if it was not among them.
    pub async fn execute_with_fallback(
        &self,
        candidates: &[AgentProfile],
        payload: &Payload,
    ) -> Result<ExecutionOutcome, AllAgentsExhausted> {
        let chain = self.candidate_chain(candidates);
        let item = payload.item.clone();

        self.sink.emit(&OrchestrationEvent::AgentSelected {
            item: item.clone(),
            candidates: chain.iter().map(|p| p.name.clone()).collect(),
        });

        let mut machine = FallbackMachine::new(chain.len(), self.policy.clone());
        let mut failures: Vec<CandidateFailure> = Vec::new();
        let mut total_attempts = 0u32;
        let mut last_error: Option<CallError> = None;

        machine.start();
        loop {
            match machine.state().clone() {
                FallbackState::Attempting { candidate, attempt } => {
                    let profile = &chain[candidate];
                    total_attempts += 1;
                    tracing::debug!(item = %item, agent = %profile.name, attempt, "calling agent");

                    match self.call.call(profile, payload).await {
                        Ok(output) => {
                            machine.on_success();
                            let fallback_used = candidate > 0;
                            self.sink.emit(&OrchestrationEvent::AgentSucceeded {
                                item: item.clone(),
                                agent: profile.name.clone(),
                                attempts: total_attempts,
                                fallback_used,
                            });
                            tracing::info!(item = %item, agent = %profile.name, fallback_used, "agent succeeded");
                            return Ok(ExecutionOutcome {
                                agent: profile.name.clone(),
                                output,
                                fallback_used,
                                attempts: total_attempts,
                                failures,
                            });
                        }
                        Err(err) => {
                            tracing::warn!(item = %item, agent = %profile.name, attempt, "agent call failed: {}", err);
                            self.sink.emit(&OrchestrationEvent::AttemptFailed {
                                item: item.clone(),
                                agent: profile.name.clone(),
                                attempt,
                                transient: err.is_transient(),
                                error: err.to_string(),
                            });
                            machine.on_failure(err.is_transient());
                            if !matches!(machine.state(), FallbackState::Retrying { .. }) {
                                failures.push(CandidateFailure {
                                    agent: profile.name.clone(),
                                    attempts: attempt,
                                    error: err.clone(),
                                });
                            }
                            last_error = Some(err);
                        }
                    }
                }
                FallbackState::Retrying {
                    candidate,
                    attempt,
                    delay,
                } => {
                    let agent = chain[candidate].name.clone();
                    self.sink.emit(&OrchestrationEvent::RetryScheduled {
                        item: item.clone(),
                        agent: agent.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tracing::info!(item = %item, agent = %agent, attempt, ?delay, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                    machine.resume();
                }
                FallbackState::FallingBack { from, to } => {
                    self.sink.emit(&OrchestrationEvent::FallbackTriggered {
                        item: item.clone(),
                        from: chain[from].name.clone(),
                        to: chain[to].name.clone(),
                    });
                    tracing::info!(item = %item, from = %chain[from].name, to = %chain[to].name, "falling back");
                    machine.resume();
                }
                FallbackState::Exhausted => {
                    self.sink.emit(&OrchestrationEvent::AgentsExhausted {
                        item: item.clone(),
                        agents: failures.iter().map(|f| f.agent.clone()).collect(),
                    });
                    tracing::error!(
                        item = %item,
                        "all agents exhausted, last error: {}",
                        last_error.as_ref().map(|e| e.to_string()).unwrap_or_default()
                    );
                    return Err(AllAgentsExhausted { item, failures });
                }
                // Selected is left by start(); Succeeded returns above.
                FallbackState::Selected | FallbackState::Succeeded { .. } => {
                    return Err(AllAgentsExhausted { item, failures });
                }
            }
        }
    }

    /// Candidates with duplicates removed and the default agent appended if absent.
    fn candidate_chain(&self, candidates: &[AgentProfile]) -> Vec<AgentProfile> {
        let mut chain: Vec<AgentProfile> = Vec::with_capacity(candidates.len() + 1);
        for profile in candidates {
            if !chain.iter().any(|p| p.name.eq_ignore_ascii_case(&profile.name)) {
                chain.push(profile.clone());
            }
        }
        if !chain
            .iter()
            .any(|p| p.name.eq_ignore_ascii_case(&self.default_agent.name))
        {
            chain.push(self.default_agent.clone());
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Capability;
    use crate::events::MemorySink;
    use crate::test_support::FakeCall;
    use crate::workflow::CommandKind;

    fn profile(name: &str) -> AgentProfile {
        AgentProfile::new(name)
            .with_capabilities([Capability::Testing])
            .with_priority(5)
    }

    fn coordinator(call: Arc<FakeCall>, sink: Arc<MemorySink>) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            call,
            RetryPolicy::default(),
            AgentProfile::builtin_generic(),
            sink,
        )
    }

    fn payload() -> Payload {
        Payload::new("checklist", CommandKind::Checklist, "Make a checklist.")
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(60), Duration::from_secs(10));
    }

    #[test]
    fn machine_retries_only_first_candidate_on_transient() {
        let mut m = FallbackMachine::new(3, RetryPolicy::default());
        assert_eq!(
            *m.start(),
            FallbackState::Attempting { candidate: 0, attempt: 1 }
        );
        assert!(matches!(
            m.on_failure(true),
            FallbackState::Retrying { candidate: 0, attempt: 2, .. }
        ));
        m.resume();
        assert_eq!(
            *m.on_failure(true),
            FallbackState::FallingBack { from: 0, to: 1 }
        );
        assert_eq!(
            *m.resume(),
            FallbackState::Attempting { candidate: 1, attempt: 1 }
        );
        // Later candidates never retry, even on transient failures.
        assert_eq!(
            *m.on_failure(true),
            FallbackState::FallingBack { from: 1, to: 2 }
        );
        m.resume();
        assert_eq!(*m.on_failure(true), FallbackState::Exhausted);
        assert!(m.state().is_terminal());
    }

    #[test]
    fn machine_skips_retry_on_permanent_failure() {
        let mut m = FallbackMachine::new(2, RetryPolicy::default());
        m.start();
        assert_eq!(
            *m.on_failure(false),
            FallbackState::FallingBack { from: 0, to: 1 }
        );
    }

    #[test]
    fn machine_ignores_inputs_that_do_not_apply() {
        let mut m = FallbackMachine::new(1, RetryPolicy::default());
        assert_eq!(*m.on_success(), FallbackState::Selected);
        m.start();
        m.on_success();
        assert_eq!(*m.on_failure(true), FallbackState::Succeeded { candidate: 0 });
        assert_eq!(*m.resume(), FallbackState::Succeeded { candidate: 0 });
    }

    #[test]
    fn machine_with_no_candidates_is_exhausted() {
        let mut m = FallbackMachine::new(0, RetryPolicy::default());
        assert_eq!(*m.start(), FallbackState::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_exhausts_in_expected_order() {
        let call = Arc::new(FakeCall::always(CallError::timeout("slow")));
        let sink = Arc::new(MemorySink::new());
        let coord = coordinator(call.clone(), sink.clone());

        let err = coord
            .execute_with_fallback(&[profile("a"), profile("b")], &payload())
            .await
            .unwrap_err();

        assert_eq!(call.agents_called(), vec!["a", "a", "b", "generic"]);
        assert_eq!(err.agents(), vec!["a", "b", "generic"]);
        let attempts: Vec<u32> = err.failures.iter().map(|f| f.attempts).collect();
        assert_eq!(attempts, vec![2, 1, 1]);
        assert!(err.to_string().contains("exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_scale_with_policy() {
        let call = Arc::new(FakeCall::always(CallError::rate_limit("429")));
        let coord = ExecutionCoordinator::new(
            call.clone(),
            RetryPolicy {
                max_attempts: 4,
                ..RetryPolicy::default()
            },
            AgentProfile::builtin_generic(),
            Arc::new(MemorySink::new()),
        );
        let started = tokio::time::Instant::now();
        coord
            .execute_with_fallback(&[profile("a"), profile("b"), profile("c")], &payload())
            .await
            .unwrap_err();
        assert_eq!(
            call.agents_called(),
            vec!["a", "a", "a", "a", "b", "c", "generic"]
        );
        // 2s + 4s + 8s of backoff on the first candidate only.
        assert!(started.elapsed() >= Duration::from_secs(14));
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_stays_on_first_candidate() {
        let call = Arc::new(
            FakeCall::new().script("a", vec![Err(CallError::timeout("slow")), Ok("done".into())]),
        );
        let sink = Arc::new(MemorySink::new());
        let outcome = coordinator(call.clone(), sink.clone())
            .execute_with_fallback(&[profile("a")], &payload())
            .await
            .unwrap();

        assert_eq!(outcome.agent, "a");
        assert_eq!(outcome.output, "done");
        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.fallback_used);
        assert!(outcome.failures.is_empty());

        let names: Vec<&str> = sink.events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["agent_selected", "attempt_failed", "retry_scheduled", "agent_succeeded"]
        );
    }

    #[tokio::test]
    async fn permanent_failure_falls_back_without_retry() {
        let call = Arc::new(
            FakeCall::new().script("a", vec![Err(CallError::permanent("bad key"))]),
        );
        let sink = Arc::new(MemorySink::new());
        let outcome = coordinator(call.clone(), sink.clone())
            .execute_with_fallback(&[profile("a"), profile("b")], &payload())
            .await
            .unwrap();

        assert_eq!(outcome.agent, "b");
        assert!(outcome.fallback_used);
        assert_eq!(call.agents_called(), vec!["a", "b"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].error, CallError::permanent("bad key"));
        assert!(sink.events().contains(&OrchestrationEvent::FallbackTriggered {
            item: "checklist".into(),
            from: "a".into(),
            to: "b".into(),
        }));
    }

    #[tokio::test]
    async fn default_agent_is_last_resort() {
        let call = Arc::new(
            FakeCall::new().script("a", vec![Err(CallError::permanent("nope"))]),
        );
        let outcome = coordinator(call.clone(), Arc::new(MemorySink::new()))
            .execute_with_fallback(&[profile("a")], &payload())
            .await
            .unwrap();
        assert_eq!(outcome.agent, "generic");
        assert!(outcome.fallback_used);
    }

    #[tokio::test]
    async fn default_agent_is_not_tried_twice() {
        let call = Arc::new(FakeCall::always(CallError::permanent("down")));
        let err = coordinator(call.clone(), Arc::new(MemorySink::new()))
            .execute_with_fallback(
                &[AgentProfile::builtin_generic(), profile("a")],
                &payload(),
            )
            .await
            .unwrap_err();
        assert_eq!(call.agents_called(), vec!["generic", "a"]);
        assert_eq!(err.failures.len(), 2);
    }

    #[tokio::test]
    async fn empty_candidate_list_uses_default() {
        let call = Arc::new(FakeCall::new());
        let outcome = coordinator(call, Arc::new(MemorySink::new()))
            .execute_with_fallback(&[], &payload())
            .await
            .unwrap();
        assert_eq!(outcome.agent, "generic");
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn execute_is_a_single_attempt() {
        let call = Arc::new(FakeCall::always(CallError::timeout("slow")));
        let err = coordinator(call.clone(), Arc::new(MemorySink::new()))
            .execute(&profile("a"), &payload())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(call.agents_called(), vec!["a"]);
    }
}
