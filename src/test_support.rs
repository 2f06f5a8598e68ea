use crate::agent::{
    AgentCall, AgentProfile, CallError, Capability, CapabilityRegistry, Payload,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

/// archie (architecture, priority 10), tess (testing, priority 8) and the
/// built-in generic fallback.
pub(crate) fn scenario_registry() -> CapabilityRegistry {
    CapabilityRegistry::new(vec![
        AgentProfile::new("archie")
            .with_capabilities([Capability::ArchitectureDesign])
            .with_priority(10),
        AgentProfile::new("tess")
            .with_capabilities([Capability::Testing])
            .with_priority(8),
        AgentProfile::builtin_generic(),
    ])
}

/// One call observed by [`FakeCall`].
#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    pub agent: String,
    pub payload: Payload,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<String, VecDeque<Result<String, CallError>>>,
    records: Vec<CallRecord>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Scriptable in-process agent call.
///
/// Unscripted calls succeed with `"<agent>:<item>"` unless the item was marked
/// failing or `always` was set.
#[derive(Default)]
pub(crate) struct FakeCall {
    state: Mutex<FakeState>,
    always: Option<CallError>,
    failing_items: HashSet<String>,
    delay: Option<Duration>,
}

impl FakeCall {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn always(err: CallError) -> Self {
        Self {
            always: Some(err),
            ..Self::default()
        }
    }

    /// Queue results for `agent`; once drained, the agent falls back to the defaults.
    pub(crate) fn script(self, agent: &str, results: Vec<Result<String, CallError>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(agent.to_string(), results.into());
        self
    }

    /// Every agent fails permanently on `item`.
    pub(crate) fn fail_item(mut self, item: &str) -> Self {
        self.failing_items.insert(item.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn agents_called(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.records.iter().map(|r| r.agent.clone()).collect()
    }

    pub(crate) fn items_called(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.records.iter().map(|r| r.payload.item.clone()).collect()
    }

    /// First completed call for `item`.
    pub(crate) fn record(&self, item: &str) -> CallRecord {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .find(|r| r.payload.item == item)
            .cloned()
            .unwrap_or_else(|| panic!("no call recorded for '{}'", item))
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

#[async_trait]
impl AgentCall for FakeCall {
    async fn call(&self, profile: &AgentProfile, payload: &Payload) -> Result<String, CallError> {
        let started = Instant::now();
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        state.records.push(CallRecord {
            agent: profile.name.clone(),
            payload: payload.clone(),
            started,
            finished: Instant::now(),
        });

        if let Some(next) = state
            .scripts
            .get_mut(&profile.name)
            .and_then(|queue| queue.pop_front())
        {
            return next;
        }
        if let Some(err) = &self.always {
            return Err(err.clone());
        }
        if self.failing_items.contains(&payload.item) {
            return Err(CallError::permanent(format!("{} refuses {}", profile.name, payload.item)));
        }
        Ok(format!("{}:{}", profile.name, payload.item))
    }
}

/// A git repository with one commit on `main`.
pub(crate) fn create_test_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();

    git(path, &["init"]);
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "user.name", "Test User"]);

    std::fs::write(path.join("README.md"), "# Test\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "Initial commit"]);

    temp_dir
}

pub(crate) fn git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .current_dir(repo_dir)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute git {}: {}", args.join(" "), e));

    if !output.status.success() {
        panic!(
            "git {} failed (exit code {:?})\nstderr:\n{}",
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
}
