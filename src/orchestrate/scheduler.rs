//! Dependency scheduler.
//!
//! Runs a batch of work items: every item whose dependencies have all
//! succeeded starts at once (up to `max_concurrency`), the scheduler waits for
//! any completion, then re-evaluates. Failures never abort the batch; they
//! fail the item and skip everything downstream of it.
//!
//! Structural problems (duplicate ids, unknown dependencies, cycles, unknown
//! agent overrides) are rejected before anything executes.

use super::coordinator::{AllAgentsExhausted, ExecutionCoordinator, ExecutionOutcome};
use super::graph::topological_order;
use crate::agent::{AgentProfile, CapabilityRegistry, Payload, Upstream};
use crate::error::Result;
use crate::events::{EventSink, OrchestrationEvent};
use crate::workflow::CommandKind;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One unit of work in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub kind: CommandKind,
    pub prompt: String,
    pub depends_on: Vec<String>,
    /// Explicit agents in order, bypassing capability selection.
    pub agents: Option<Vec<String>>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, kind: CommandKind, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            prompt: prompt.into(),
            depends_on: Vec::new(),
            agents: None,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_agents(mut self, names: Vec<String>) -> Self {
        self.agents = Some(names);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Why an item did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFailure {
    /// Attempted; every candidate agent failed.
    Execution(AllAgentsExhausted),
    /// Never attempted because a dependency failed.
    DependencyFailed { dependency: String },
    Cancelled,
    /// The agent succeeded but its artifact could not be written.
    Artifact { agent: String, reason: String },
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemFailure::Execution(e) => write!(f, "{}", e),
            ItemFailure::DependencyFailed { dependency } => write!(
                f,
                "skipped due to dependency failure ('{}' did not succeed)",
                dependency
            ),
            ItemFailure::Cancelled => write!(f, "cancelled"),
            ItemFailure::Artifact { agent, reason } => {
                write!(f, "output from '{}' was not saved: {}", agent, reason)
            }
        }
    }
}

/// Terminal result of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub kind: CommandKind,
    pub result: std::result::Result<ExecutionOutcome, ItemFailure>,
}

impl ItemOutcome {
    pub fn status(&self) -> ItemStatus {
        match self.result {
            Ok(_) => ItemStatus::Succeeded,
            Err(_) => ItemStatus::Failed,
        }
    }
}

/// All item outcomes, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub items: IndexMap<String, ItemOutcome>,
}

impl BatchReport {
    pub fn get(&self, id: &str) -> Option<&ItemOutcome> {
        self.items.get(id)
    }

    pub fn all_succeeded(&self) -> bool {
        self.items.values().all(|o| o.result.is_ok())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&String, CommandKind, &ExecutionOutcome)> {
        self.items
            .iter()
            .filter_map(|(id, o)| o.result.as_ref().ok().map(|r| (id, o.kind, r)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&String, CommandKind, &ItemFailure)> {
        self.items
            .iter()
            .filter_map(|(id, o)| o.result.as_ref().err().map(|e| (id, o.kind, e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    /// Upper bound on items running at once; `None` is unbounded.
    pub max_concurrency: Option<usize>,
    /// How long in-flight calls may keep running after cancellation.
    pub cancel_grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            cancel_grace: Duration::from_secs(2),
        }
    }
}

type Completion = (usize, std::result::Result<ExecutionOutcome, AllAgentsExhausted>);

/// Runs batches of work items against a coordinator.
pub struct Scheduler {
    coordinator: Arc<ExecutionCoordinator>,
    options: SchedulerOptions,
    sink: Arc<dyn EventSink>,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<ExecutionCoordinator>,
        options: SchedulerOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            coordinator,
            options,
            sink,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run `items` to completion (or cancellation).
    ///
    /// Candidate lists are snapshotted from `registry` before the first item
    /// starts. Returns only once every item is terminal.
    pub async fn run(
        &self,
        registry: &CapabilityRegistry,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        topological_order(
            items
                .iter()
                .map(|i| (i.id.as_str(), i.depends_on.as_slice())),
        )?;

        let candidates: Vec<Vec<AgentProfile>> = items
            .iter()
            .map(|item| match &item.agents {
                Some(names) if !names.is_empty() => registry.resolve_override(names),
                _ => Ok(registry.select_for_command(item.kind)),
            })
            .collect::<Result<_>>()?;

        tracing::info!(items = items.len(), max_concurrency = ?self.options.max_concurrency, "starting batch");

        let mut run = BatchRun::new(&items, &*self.sink);
        let limit = self.options.max_concurrency.unwrap_or(usize::MAX).max(1);
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                tracing::warn!("batch cancelled, abandoning items that have not started");
                run.cancel_pending();
            }

            if !cancelled {
                while in_flight.len() < limit {
                    let Some(idx) = run.ready.pop_front() else { break };
                    in_flight.push(self.launch(&mut run, idx, candidates[idx].clone()));
                }
            }

            if in_flight.is_empty() {
                break;
            }

            if cancelled {
                let deadline = tokio::time::Instant::now() + self.options.cancel_grace;
                loop {
                    match tokio::time::timeout_at(deadline, in_flight.next()).await {
                        Ok(Some((idx, result))) => run.complete(idx, result),
                        Ok(None) => break,
                        Err(_) => {
                            tracing::warn!(
                                abandoned = in_flight.len(),
                                "cancel grace period elapsed, abandoning in-flight calls"
                            );
                            break;
                        }
                    }
                }
                // Dropping the futures abandons the calls.
                drop(in_flight);
                run.cancel_running();
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                next = in_flight.next() => {
                    if let Some((idx, result)) = next {
                        run.complete(idx, result);
                    }
                }
            }
        }

        Ok(run.into_report())
    }

    fn launch(
        &self,
        run: &mut BatchRun<'_>,
        idx: usize,
        candidates: Vec<AgentProfile>,
    ) -> BoxFuture<'static, Completion> {
        let items = run.items;
        let item = &items[idx];
        run.status[idx] = ItemStatus::Running;
        self.sink.emit(&OrchestrationEvent::ItemStarted {
            item: item.id.clone(),
            command: item.kind,
        });
        tracing::debug!(item = %item.id, command = %item.kind, "starting item");

        let mut payload = Payload::new(item.id.clone(), item.kind, item.prompt.clone());
        payload.upstream = run.upstream_for(idx);

        let coordinator = self.coordinator.clone();
        async move {
            let result = coordinator.execute_with_fallback(&candidates, &payload).await;
            (idx, result)
        }
        .boxed()
    }
}

/// Mutable bookkeeping for one `Scheduler::run`.
struct BatchRun<'a> {
    items: &'a [WorkItem],
    sink: &'a dyn EventSink,
    status: Vec<ItemStatus>,
    results: Vec<Option<std::result::Result<ExecutionOutcome, ItemFailure>>>,
    dependents: Vec<Vec<usize>>,
    waiting_on: Vec<usize>,
    ready: VecDeque<usize>,
}

impl<'a> BatchRun<'a> {
    fn new(items: &'a [WorkItem], sink: &'a dyn EventSink) -> Self {
        let index: HashMap<&str, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); items.len()];
        let mut waiting_on = vec![0; items.len()];
        for (idx, item) in items.iter().enumerate() {
            let mut deps: Vec<usize> = item
                .depends_on
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect();
            deps.sort_unstable();
            deps.dedup();
            waiting_on[idx] = deps.len();
            for dep in deps {
                dependents[dep].push(idx);
            }
        }

        let ready = (0..items.len()).filter(|&i| waiting_on[i] == 0).collect();

        Self {
            items,
            sink,
            status: vec![ItemStatus::Pending; items.len()],
            results: vec![None; items.len()],
            dependents,
            waiting_on,
            ready,
        }
    }

    fn upstream_for(&self, idx: usize) -> Vec<Upstream> {
        self.items[idx]
            .depends_on
            .iter()
            .filter_map(|dep| {
                let dep_idx = self.items.iter().position(|i| &i.id == dep)?;
                match &self.results[dep_idx] {
                    Some(Ok(outcome)) => Some(Upstream {
                        item: dep.clone(),
                        agent: outcome.agent.clone(),
                        output: outcome.output.clone(),
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    fn complete(&mut self, idx: usize, result: std::result::Result<ExecutionOutcome, AllAgentsExhausted>) {
        let id = self.items[idx].id.clone();
        match result {
            Ok(outcome) => {
                self.sink.emit(&OrchestrationEvent::ItemCompleted {
                    item: id.clone(),
                    agent: outcome.agent.clone(),
                });
                tracing::info!(item = %id, agent = %outcome.agent, "item succeeded");
                self.status[idx] = ItemStatus::Succeeded;
                self.results[idx] = Some(Ok(outcome));

                for &dep in &self.dependents[idx] {
                    self.waiting_on[dep] -= 1;
                    if self.waiting_on[dep] == 0 && self.status[dep] == ItemStatus::Pending {
                        self.ready.push_back(dep);
                    }
                }
            }
            Err(exhausted) => {
                tracing::warn!(item = %id, "item failed");
                self.status[idx] = ItemStatus::Failed;
                self.results[idx] = Some(Err(ItemFailure::Execution(exhausted)));
                self.skip_dependents(idx);
            }
        }
    }

    /// Fail everything downstream of `failed` that has not started.
    fn skip_dependents(&mut self, failed: usize) {
        let mut queue = VecDeque::from([failed]);
        while let Some(current) = queue.pop_front() {
            for dep in self.dependents[current].clone() {
                if self.status[dep] != ItemStatus::Pending {
                    continue;
                }
                let dependency = self.items[current].id.clone();
                self.sink.emit(&OrchestrationEvent::ItemSkipped {
                    item: self.items[dep].id.clone(),
                    dependency: dependency.clone(),
                });
                tracing::info!(item = %self.items[dep].id, dependency = %dependency, "skipping item");
                self.status[dep] = ItemStatus::Failed;
                self.results[dep] = Some(Err(ItemFailure::DependencyFailed { dependency }));
                self.ready.retain(|&r| r != dep);
                queue.push_back(dep);
            }
        }
    }

    fn cancel_where(&mut self, status: ItemStatus) {
        for idx in 0..self.items.len() {
            if self.status[idx] == status {
                self.sink.emit(&OrchestrationEvent::ItemCancelled {
                    item: self.items[idx].id.clone(),
                });
                self.status[idx] = ItemStatus::Failed;
                self.results[idx] = Some(Err(ItemFailure::Cancelled));
            }
        }
    }

    fn cancel_pending(&mut self) {
        self.ready.clear();
        self.cancel_where(ItemStatus::Pending);
    }

    fn cancel_running(&mut self) {
        self.cancel_where(ItemStatus::Running);
    }

    fn into_report(self) -> BatchReport {
        let items = self
            .items
            .iter()
            .zip(self.results)
            .map(|(item, result)| {
                let result = result.unwrap_or(Err(ItemFailure::Cancelled));
                (
                    item.id.clone(),
                    ItemOutcome {
                        kind: item.kind,
                        result,
                    },
                )
            })
            .collect();
        BatchReport { items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CallError;
    use crate::error::SpecrunError;
    use crate::events::MemorySink;
    use crate::orchestrate::RetryPolicy;
    use crate::test_support::{FakeCall, scenario_registry};
    use tokio::time::Instant;

    fn scheduler(call: Arc<FakeCall>, options: SchedulerOptions) -> (Scheduler, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let registry = scenario_registry();
        let coordinator = Arc::new(ExecutionCoordinator::new(
            call,
            RetryPolicy::default(),
            registry.default_agent().clone(),
            sink.clone(),
        ));
        (Scheduler::new(coordinator, options, sink.clone()), sink)
    }

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id, CommandKind::Checklist, format!("do {}", id))
    }

    #[tokio::test(start_paused = true)]
    async fn dependent_starts_after_all_prerequisites() {
        let call = Arc::new(FakeCall::new().with_delay(Duration::from_secs(1)));
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let items = vec![
            item("1"),
            item("2"),
            item("3"),
            item("4").depends_on(["1", "2", "3"]),
        ];

        let report = scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.all_succeeded());
        assert_eq!(call.max_in_flight(), 3);
        let last_prereq_end = ["1", "2", "3"]
            .iter()
            .map(|id| call.record(id).finished)
            .max()
            .unwrap();
        assert!(call.record("4").started >= last_prereq_end);
        let keys: Vec<&str> = report.items.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn max_concurrency_bounds_parallelism() {
        let call = Arc::new(FakeCall::new().with_delay(Duration::from_secs(1)));
        let (scheduler, _) = scheduler(
            call.clone(),
            SchedulerOptions {
                max_concurrency: Some(2),
                ..SchedulerOptions::default()
            },
        );
        let items = (1..=5).map(|i| item(&i.to_string())).collect();
        let started = Instant::now();
        let report = scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.all_succeeded());
        assert_eq!(call.max_in_flight(), 2);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn failure_skips_dependents_transitively() {
        let call = Arc::new(FakeCall::new().fail_item("a"));
        let (scheduler, sink) = scheduler(call.clone(), SchedulerOptions::default());
        let items = vec![
            item("a"),
            item("b").depends_on(["a"]),
            item("c").depends_on(["b"]),
            item("d"),
        ];

        let report = scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            report.get("a").unwrap().result,
            Err(ItemFailure::Execution(_))
        ));
        assert_eq!(
            report.get("b").unwrap().result,
            Err(ItemFailure::DependencyFailed {
                dependency: "a".into()
            })
        );
        assert_eq!(
            report.get("c").unwrap().result,
            Err(ItemFailure::DependencyFailed {
                dependency: "b".into()
            })
        );
        assert!(report.get("d").unwrap().result.is_ok());
        assert!(!call.items_called().contains(&"b".to_string()));
        assert!(!call.items_called().contains(&"c".to_string()));
        assert!(
            report.get("b").unwrap().result.as_ref().unwrap_err().to_string()
                .starts_with("skipped due to dependency failure")
        );
        assert!(sink.events().iter().any(|e| e.name() == "item_skipped"));
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_any_call() {
        let call = Arc::new(FakeCall::new());
        let (scheduler, sink) = scheduler(call.clone(), SchedulerOptions::default());
        let items = vec![
            item("a").depends_on(["b"]),
            item("b").depends_on(["a"]),
            item("c"),
        ];
        let err = scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SpecrunError::CyclicDependency(ref names) if names == &["a", "b"]));
        assert!(call.agents_called().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_override_is_rejected_before_any_call() {
        let call = Arc::new(FakeCall::new());
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let items = vec![item("a"), item("b").with_agents(vec!["ghost".into()])];
        let err = scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SpecrunError::UnknownAgent(_)));
        assert!(call.agents_called().is_empty());
    }

    #[tokio::test]
    async fn dependents_receive_upstream_output() {
        let call = Arc::new(FakeCall::new());
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let items = vec![
            WorkItem::new("plan", CommandKind::Plan, "plan it"),
            WorkItem::new("tasks", CommandKind::Tasks, "split it").depends_on(["plan"]),
        ];
        scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap();

        let payload = call.record("tasks").payload;
        assert_eq!(
            payload.upstream,
            vec![Upstream {
                item: "plan".into(),
                agent: "archie".into(),
                output: "archie:plan".into(),
            }]
        );
    }

    #[tokio::test]
    async fn agent_override_bypasses_selection() {
        let call = Arc::new(FakeCall::new());
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let items = vec![
            WorkItem::new("plan", CommandKind::Plan, "plan it").with_agents(vec!["TESS".into()]),
        ];
        let report = scheduler
            .run(&scenario_registry(), items, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.get("plan").unwrap().result.as_ref().unwrap().agent, "tess");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_slow_calls_after_grace() {
        let call = Arc::new(FakeCall::new().with_delay(Duration::from_secs(30)));
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = scheduler
            .run(
                &scenario_registry(),
                vec![item("a"), item("b").depends_on(["a"])],
                &token,
            )
            .await
            .unwrap();

        assert_eq!(report.get("a").unwrap().result, Err(ItemFailure::Cancelled));
        assert_eq!(report.get("b").unwrap().result, Err(ItemFailure::Cancelled));
        assert!(call.items_called().iter().all(|i| i == "a"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_may_finish_within_grace() {
        let call = Arc::new(FakeCall::new().with_delay(Duration::from_secs(2)));
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = scheduler
            .run(
                &scenario_registry(),
                vec![item("a"), item("b").depends_on(["a"])],
                &token,
            )
            .await
            .unwrap();

        assert!(report.get("a").unwrap().result.is_ok());
        assert_eq!(report.get("b").unwrap().result, Err(ItemFailure::Cancelled));
    }

    #[tokio::test]
    async fn already_cancelled_token_runs_nothing() {
        let call = Arc::new(FakeCall::new());
        let (scheduler, _) = scheduler(call.clone(), SchedulerOptions::default());
        let token = CancellationToken::new();
        token.cancel();
        let report = scheduler
            .run(&scenario_registry(), vec![item("a"), item("b")], &token)
            .await
            .unwrap();
        assert!(report.items.values().all(|o| o.result == Err(ItemFailure::Cancelled)));
        assert!(call.agents_called().is_empty());
    }

    #[tokio::test]
    async fn permanent_failures_only_fail_their_own_item() {
        let call = Arc::new(FakeCall::always(CallError::permanent("down")));
        let (scheduler, _) = scheduler(call, SchedulerOptions::default());
        let report = scheduler
            .run(&scenario_registry(), vec![item("a"), item("b")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.failed().count(), 2);
        assert!(report.items.values().all(|o| o.status() == ItemStatus::Failed));
    }
}
