//! A long-lived runner session for one feature.
//!
//! The session owns the agent registry, the prompt library and the feature's
//! workflow machine. Running a request:
//!
//! 1. acquires the feature lock
//! 2. turns the requested commands into work items (prerequisites requested
//!    in the same batch become dependencies, prerequisites already on disk
//!    become prompt context)
//! 3. runs the batch through the scheduler
//! 4. writes each successful output to `specs/<feature>/<artifact>`
//! 5. records the successes in the workflow state
//!
//! Per-item failures do not abort the batch, including an artifact that
//! cannot be written; they are reported in the returned [`RunSummary`].

use crate::agent::prompt::{PromptInput, PromptLibrary};
use crate::agent::{AgentCall, AgentsConfig, CapabilityRegistry, CommandAgentCall};
use crate::config::Config;
use crate::context::WorkspaceContext;
use crate::error::{Result, SpecrunError};
use crate::events::{EventSink, FanoutSink, NdjsonEventLog, OrchestrationEvent};
use crate::exit_codes;
use crate::fs::atomic_write;
use crate::orchestrate::{
    BatchReport, ExecutionCoordinator, ItemFailure, Scheduler, WorkItem,
};
use crate::workflow::{CommandKind, FileStateStore, Phase, Transition, WorkflowMachine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How to open a session.
#[derive(Default)]
pub struct SessionOptions {
    /// Feature id; detected from the git branch when unset.
    pub feature: Option<String>,
    /// Overrides `scheduler.max_concurrency` from the config.
    pub max_concurrency: Option<usize>,
    /// Extra event sinks (console output, channels).
    pub observers: Vec<Arc<dyn EventSink>>,
    /// Replaces the subprocess agent call.
    pub call: Option<Arc<dyn AgentCall>>,
}

/// One request: commands to run together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub commands: Vec<CommandKind>,
    /// Free-form user input handed to every command's prompt.
    pub input: Option<String>,
    /// Explicit agents, in order, for every item.
    pub agents: Option<Vec<String>>,
}

impl WorkflowRequest {
    pub fn new(commands: Vec<CommandKind>) -> Self {
        Self {
            commands,
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = Some(agents);
        self
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub feature: String,
    pub report: BatchReport,
    /// Artifacts written, in submission order.
    pub artifacts: Vec<(CommandKind, PathBuf)>,
    pub transitions: Vec<Transition>,
    pub phase: Phase,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.report.all_succeeded()
    }

    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            exit_codes::SUCCESS
        } else {
            exit_codes::AGENT_FAILURE
        }
    }

    /// The error to surface when some item failed.
    ///
    /// A lone execution failure keeps its per-agent detail; anything else is
    /// summarized item by item.
    pub fn failure(&self) -> Option<SpecrunError> {
        let failed: Vec<_> = self.report.failed().collect();
        match failed.as_slice() {
            [] => None,
            [(_, _, ItemFailure::Execution(e))] if self.report.items.len() == 1 => {
                Some(SpecrunError::AllAgentsExhausted(e.clone()))
            }
            _ => Some(SpecrunError::ItemsFailed(
                failed
                    .iter()
                    .map(|(id, _, why)| format!("- {}: {}", id, why))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
        }
    }
}

pub struct Session {
    ctx: WorkspaceContext,
    config: Config,
    feature: String,
    registry: CapabilityRegistry,
    prompts: PromptLibrary,
    machine: WorkflowMachine,
    sink: Arc<dyn EventSink>,
    call: Arc<dyn AgentCall>,
    max_concurrency: Option<usize>,
}

impl Session {
    /// Load config, the agent catalog and the feature's checkpoint.
    pub fn open(ctx: WorkspaceContext, options: SessionOptions) -> Result<Self> {
        let config = Config::load(ctx.config_path())?;
        let feature = ctx.detect_feature(options.feature.as_deref())?;

        let catalog = load_catalog(&ctx, &config)?;
        let registry = CapabilityRegistry::from_config(&catalog);
        let prompts = PromptLibrary::with_overrides(&catalog.prompt_templates)?;

        let mut fanout = FanoutSink::new();
        if config.event_log {
            fanout = fanout.with(Arc::new(NdjsonEventLog::new(ctx.feature_events_file(&feature))));
        }
        for observer in options.observers {
            fanout = fanout.with(observer);
        }
        let sink: Arc<dyn EventSink> = Arc::new(fanout);

        let call = match options.call {
            Some(call) => call,
            None => Arc::new(CommandAgentCall::new(
                &ctx.root,
                ctx.feature_state_dir(&feature).join("logs"),
                registry.defaults().clone(),
            )),
        };

        let specs_dir = ctx.feature_specs_dir(&config, &feature);
        let machine = WorkflowMachine::open(
            &ctx,
            &feature,
            Arc::new(FileStateStore::new(&ctx.features_dir)),
            sink.clone(),
            infer_phase(&specs_dir),
        )?;

        tracing::info!(
            feature = %feature,
            phase = %machine.state().current_phase,
            agents = registry.list(false).len(),
            "session opened"
        );

        Ok(Self {
            max_concurrency: options.max_concurrency.or(config.scheduler.max_concurrency),
            ctx,
            config,
            feature,
            registry,
            prompts,
            machine,
            sink,
            call,
        })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.ctx
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn machine(&self) -> &WorkflowMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut WorkflowMachine {
        &mut self.machine
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.ctx.feature_specs_dir(&self.config, &self.feature)
    }

    /// Enable an agent for the rest of the session.
    pub fn enable_agent(&mut self, name: &str) -> Result<String> {
        let _guard = self.machine.lock("agents enable")?;
        let agent = self.registry.enable(name)?;
        self.sink.emit(&OrchestrationEvent::AgentEnabled {
            agent: agent.clone(),
        });
        Ok(agent)
    }

    /// Disable an agent for the rest of the session. The fallback agent is protected.
    pub fn disable_agent(&mut self, name: &str) -> Result<String> {
        let _guard = self.machine.lock("agents disable")?;
        let agent = self.registry.disable(name)?;
        self.sink.emit(&OrchestrationEvent::AgentDisabled {
            agent: agent.clone(),
        });
        Ok(agent)
    }

    /// Turn a request into work items without running anything.
    pub fn plan_batch(&self, request: &WorkflowRequest) -> Result<Vec<WorkItem>> {
        if request.commands.is_empty() {
            return Err(SpecrunError::UserError("no command given".to_string()));
        }

        let mut commands: Vec<CommandKind> = Vec::with_capacity(request.commands.len());
        for kind in &request.commands {
            if !commands.contains(kind) {
                commands.push(*kind);
            }
        }

        let input = request
            .input
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let specs_dir = self.specs_dir();

        let mut items = Vec::with_capacity(commands.len());
        for &kind in &commands {
            if kind.requires_input() && input.is_none() {
                return Err(SpecrunError::UserError(format!(
                    "/{} needs a description, e.g. /{} <what to build>",
                    kind, kind
                )));
            }

            let direct = kind.prerequisites();
            let mut depends_on = Vec::new();
            let mut context = Vec::new();
            for ancestor in lineage(kind) {
                if commands.contains(&ancestor) {
                    if direct.contains(&ancestor) {
                        depends_on.push(ancestor.as_str().to_string());
                    }
                    continue;
                }
                let path = specs_dir.join(ancestor.artifact_name());
                match read_artifact(&path)? {
                    Some(body) => context.push((ancestor, body)),
                    None if direct.contains(&ancestor) => {
                        return Err(SpecrunError::UserError(format!(
                            "{} not found at {}. Run /{} first.",
                            ancestor.artifact_name(),
                            path.display(),
                            ancestor
                        )));
                    }
                    None => {}
                }
            }

            let prompt = self.prompts.build(
                kind,
                &PromptInput {
                    feature: self.feature.clone(),
                    input: input.map(str::to_string),
                    context,
                },
            )?;

            let mut item = WorkItem::new(kind.as_str(), kind, prompt).depends_on(depends_on);
            if let Some(agents) = &request.agents
                && !agents.is_empty()
            {
                item = item.with_agents(agents.clone());
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Run a request under the feature lock.
    pub async fn run(
        &mut self,
        request: &WorkflowRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let guard = self.machine.lock("run")?;
        let items = self.plan_batch(request)?;

        let coordinator = Arc::new(ExecutionCoordinator::new(
            self.call.clone(),
            self.config.retry.to_policy(),
            self.registry.default_agent().clone(),
            self.sink.clone(),
        ));
        let mut options = self.config.scheduler.to_options();
        options.max_concurrency = self.max_concurrency;
        let scheduler = Scheduler::new(coordinator, options, self.sink.clone());

        let mut report = scheduler.run(&self.registry, items, cancel).await?;

        // A failed write fails only its own item; the rest are still recorded.
        let specs_dir = self.specs_dir();
        let mut artifacts = Vec::new();
        let mut completions = Vec::new();
        let mut unsaved = Vec::new();
        for (id, kind, outcome) in report.succeeded() {
            let path = specs_dir.join(kind.artifact_name());
            match atomic_write(&path, ensure_trailing_newline(&outcome.output).as_bytes()) {
                Ok(()) => {
                    tracing::info!(command = %kind, path = %path.display(), "artifact written");
                    artifacts.push((kind, path));
                    completions.push((kind, outcome.agent.clone()));
                }
                Err(e) => {
                    tracing::warn!(command = %kind, path = %path.display(), "artifact not written: {}", e);
                    unsaved.push((
                        id.clone(),
                        ItemFailure::Artifact {
                            agent: outcome.agent.clone(),
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }
        for (id, failure) in unsaved {
            if let Some(item) = report.items.get_mut(&id) {
                item.result = Err(failure);
            }
        }

        let transitions = self.machine.record_batch(&guard, &completions)?;
        drop(guard);

        Ok(RunSummary {
            feature: self.feature.clone(),
            report,
            artifacts,
            transitions,
            phase: self.machine.state().current_phase,
        })
    }
}

/// Load the agent catalog: `agents.yaml` if present, else `agents/*.md`,
/// else an empty catalog (only the built-in fallback agent).
///
/// `selection.max_candidates` from the config overrides the catalog default.
pub fn load_catalog(ctx: &WorkspaceContext, config: &Config) -> Result<AgentsConfig> {
    let mut catalog = match AgentsConfig::load(ctx.agents_file(config))? {
        Some(catalog) => catalog,
        None => {
            let dir = ctx.agents_dir(config);
            if dir.is_dir() {
                AgentsConfig::load_dir(&dir)?
            } else {
                tracing::debug!("no agent catalog, using the built-in generic agent only");
                AgentsConfig::default()
            }
        }
    };
    if let Some(max) = config.selection.max_candidates {
        catalog.defaults.max_candidates = max;
    }
    Ok(catalog)
}

/// Phase implied by the artifacts already on disk.
fn infer_phase(specs_dir: &Path) -> Phase {
    [
        (CommandKind::Tasks, Phase::Tasked),
        (CommandKind::Plan, Phase::Planned),
        (CommandKind::Specify, Phase::Specified),
    ]
    .into_iter()
    .find(|(kind, _)| specs_dir.join(kind.artifact_name()).is_file())
    .map(|(_, phase)| phase)
    .unwrap_or_default()
}

/// All prerequisites of `kind`, transitively, roots first.
fn lineage(kind: CommandKind) -> Vec<CommandKind> {
    let mut out = Vec::new();
    for &pre in kind.prerequisites() {
        for ancestor in lineage(pre) {
            if !out.contains(&ancestor) {
                out.push(ancestor);
            }
        }
        if !out.contains(&pre) {
            out.push(pre);
        }
    }
    out
}

fn read_artifact(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|e| SpecrunError::UserError(format!("failed to read '{}': {}", path.display(), e)))
}

fn ensure_trailing_newline(text: &str) -> String {
    let mut out = text.trim_end().to_string();
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CallError;
    use crate::events::MemorySink;
    use crate::test_support::FakeCall;
    use std::fs;
    use tempfile::TempDir;

    const AGENTS_YAML: &str = r#"
agents:
  archie:
    role: architect
    capabilities: [architecture_design, component_design]
    priority: 10
  tess:
    role: tester
    capabilities: [testing, quality_assurance]
    priority: 8
  planner:
    role: project manager
    capabilities: [project_management, task_breakdown]
    priority: 7
"#;

    struct Fixture {
        dir: TempDir,
        call: Arc<FakeCall>,
        sink: Arc<MemorySink>,
    }

    impl Fixture {
        fn new(call: FakeCall) -> Self {
            let dir = TempDir::new().unwrap();
            let state = dir.path().join(".specrun");
            fs::create_dir_all(&state).unwrap();
            fs::write(state.join("config.yaml"), "retry:\n  base_delay_ms: 1\n  max_delay_ms: 1\n")
                .unwrap();
            fs::write(state.join("agents.yaml"), AGENTS_YAML).unwrap();
            Self {
                dir,
                call: Arc::new(call),
                sink: Arc::new(MemorySink::new()),
            }
        }

        fn open(&self) -> Session {
            Session::open(
                WorkspaceContext::at(self.dir.path().to_path_buf()),
                SessionOptions {
                    feature: Some("001-auth".into()),
                    observers: vec![self.sink.clone()],
                    call: Some(self.call.clone()),
                    ..SessionOptions::default()
                },
            )
            .unwrap()
        }

        fn specs(&self) -> PathBuf {
            self.dir.path().join("specs").join("001-auth")
        }

        fn write_artifact(&self, name: &str, body: &str) {
            fs::create_dir_all(self.specs()).unwrap();
            fs::write(self.specs().join(name), body).unwrap();
        }
    }

    #[test]
    fn lineage_is_roots_first() {
        assert_eq!(lineage(CommandKind::Specify), vec![]);
        assert_eq!(
            lineage(CommandKind::Implement),
            vec![CommandKind::Specify, CommandKind::Plan, CommandKind::Tasks]
        );
    }

    #[test]
    fn specify_requires_input() {
        let f = Fixture::new(FakeCall::new());
        let err = f
            .open()
            .plan_batch(&WorkflowRequest::new(vec![CommandKind::Specify]))
            .unwrap_err();
        assert!(matches!(err, SpecrunError::UserError(_)));
    }

    #[test]
    fn missing_prerequisite_artifact_is_reported() {
        let f = Fixture::new(FakeCall::new());
        let err = f
            .open()
            .plan_batch(&WorkflowRequest::new(vec![CommandKind::Plan]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("spec.md not found"));
        assert!(message.contains("Run /specify first."));
    }

    #[test]
    fn in_batch_prerequisites_become_dependencies() {
        let f = Fixture::new(FakeCall::new());
        let items = f
            .open()
            .plan_batch(
                &WorkflowRequest::new(vec![
                    CommandKind::Specify,
                    CommandKind::Plan,
                    CommandKind::Checklist,
                ])
                .with_input("magic link login"),
            )
            .unwrap();

        let deps: Vec<(&str, Vec<String>)> = items
            .iter()
            .map(|i| (i.id.as_str(), i.depends_on.clone()))
            .collect();
        assert_eq!(
            deps,
            vec![
                ("specify", vec![]),
                ("plan", vec!["specify".to_string()]),
                ("checklist", vec!["specify".to_string()]),
            ]
        );
    }

    #[test]
    fn artifacts_on_disk_become_context() {
        let f = Fixture::new(FakeCall::new());
        f.write_artifact("spec.md", "SPEC BODY");
        f.write_artifact("plan.md", "PLAN BODY");

        let items = f
            .open()
            .plan_batch(&WorkflowRequest::new(vec![CommandKind::Tasks]))
            .unwrap();

        assert!(items[0].depends_on.is_empty());
        assert!(items[0].prompt.contains("SPEC BODY"));
        assert!(items[0].prompt.contains("PLAN BODY"));
    }

    #[test]
    fn fresh_feature_phase_follows_artifacts() {
        let f = Fixture::new(FakeCall::new());
        f.write_artifact("spec.md", "x");
        f.write_artifact("plan.md", "x");
        assert_eq!(f.open().machine().state().current_phase, Phase::Planned);
    }

    #[tokio::test]
    async fn run_writes_artifacts_and_advances() {
        let f = Fixture::new(FakeCall::new());
        let mut session = f.open();

        let summary = session
            .run(
                &WorkflowRequest::new(vec![CommandKind::Specify, CommandKind::Plan])
                    .with_input("magic link login"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(summary.succeeded());
        assert_eq!(summary.exit_code(), exit_codes::SUCCESS);
        assert_eq!(summary.phase, Phase::Planned);
        assert_eq!(summary.transitions.len(), 2);
        assert_eq!(
            fs::read_to_string(f.specs().join("plan.md")).unwrap(),
            "archie:plan\n"
        );
        assert_eq!(
            fs::read_to_string(f.specs().join("spec.md")).unwrap(),
            "generic:specify\n"
        );
        assert!(!f.dir.path().join(".specrun/locks/001-auth.lock").exists());

        // The checkpoint survives a new session.
        assert_eq!(f.open().machine().state().current_phase, Phase::Planned);

        let log = crate::events::read_events(
            &f.dir.path().join(".specrun/features/001-auth/events.ndjson"),
        )
        .unwrap();
        assert!(log.iter().any(|r| r.event.name() == "phase_advanced"));
    }

    #[tokio::test]
    async fn partial_failure_records_only_successes() {
        let f = Fixture::new(FakeCall::new().fail_item("plan"));
        let mut session = f.open();

        let summary = session
            .run(
                &WorkflowRequest::new(vec![
                    CommandKind::Specify,
                    CommandKind::Plan,
                    CommandKind::Tasks,
                ])
                .with_input("magic link login"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!summary.succeeded());
        assert_eq!(summary.exit_code(), exit_codes::AGENT_FAILURE);
        assert_eq!(summary.phase, Phase::Specified);
        assert!(f.specs().join("spec.md").exists());
        assert!(!f.specs().join("plan.md").exists());
        assert_eq!(
            summary.report.get("tasks").unwrap().result,
            Err(ItemFailure::DependencyFailed {
                dependency: "plan".into()
            })
        );
        let err = summary.failure().unwrap();
        assert!(matches!(err, SpecrunError::ItemsFailed(_)));
        assert!(err.to_string().contains("- tasks: skipped due to dependency failure"));
    }

    #[tokio::test]
    async fn unwritable_artifact_fails_only_its_item() {
        let f = Fixture::new(FakeCall::new());
        fs::create_dir_all(f.specs().join("plan.md")).unwrap();
        let mut session = f.open();

        let summary = session
            .run(
                &WorkflowRequest::new(vec![CommandKind::Specify, CommandKind::Plan])
                    .with_input("magic link login"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.exit_code(), exit_codes::AGENT_FAILURE);
        assert_eq!(summary.artifacts, vec![(CommandKind::Specify, f.specs().join("spec.md"))]);
        assert!(matches!(
            summary.report.get("plan").unwrap().result,
            Err(ItemFailure::Artifact { ref agent, .. }) if agent == "archie"
        ));
        let message = summary.failure().unwrap().to_string();
        assert!(message.contains("- plan: output from 'archie' was not saved"));

        let reopened = f.open();
        let state = reopened.machine().state();
        assert_eq!(state.current_phase, Phase::Specified);
        let recorded: Vec<Option<CommandKind>> =
            state.completed().iter().map(|r| r.command).collect();
        assert_eq!(recorded, vec![Some(CommandKind::Specify)]);
    }

    #[tokio::test]
    async fn lone_failure_keeps_agent_detail() {
        let f = Fixture::new(FakeCall::always(CallError::permanent("quota exhausted")));
        f.write_artifact("spec.md", "SPEC");
        let mut session = f.open();

        let summary = session
            .run(&WorkflowRequest::new(vec![CommandKind::Plan]), &CancellationToken::new())
            .await
            .unwrap();

        let err = summary.failure().unwrap();
        assert!(matches!(err, SpecrunError::AllAgentsExhausted(_)));
        assert_eq!(err.exit_code(), exit_codes::AGENT_FAILURE);
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[tokio::test]
    async fn explicit_agents_override_selection() {
        let f = Fixture::new(FakeCall::new());
        f.write_artifact("spec.md", "SPEC");
        let mut session = f.open();

        session
            .run(
                &WorkflowRequest::new(vec![CommandKind::Plan]).with_agents(vec!["tess".into()]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(f.call.agents_called(), vec!["tess"]);
    }

    #[tokio::test]
    async fn disabled_agent_is_skipped_by_selection() {
        let f = Fixture::new(FakeCall::new());
        f.write_artifact("spec.md", "SPEC");
        let mut session = f.open();

        assert_eq!(session.disable_agent("ARCHIE").unwrap(), "archie");
        session
            .run(&WorkflowRequest::new(vec![CommandKind::Plan]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.call.agents_called(), vec!["generic"]);
        let names: Vec<&str> = f.sink.events().iter().map(|e| e.name()).collect();
        assert_eq!(names[0], "agent_disabled");
    }

    #[test]
    fn fallback_agent_cannot_be_disabled() {
        let f = Fixture::new(FakeCall::new());
        let mut session = f.open();
        let err = session.disable_agent("generic").unwrap_err();
        assert!(matches!(err, SpecrunError::ProtectedAgent(_)));
        assert!(matches!(
            session.enable_agent("nobody").unwrap_err(),
            SpecrunError::UnknownAgent(_)
        ));
    }

    #[tokio::test]
    async fn held_lock_blocks_run() {
        let f = Fixture::new(FakeCall::new());
        let mut session = f.open();
        let _held = session.machine().lock("other process").unwrap();

        let err = session
            .run(
                &WorkflowRequest::new(vec![CommandKind::Specify]).with_input("x"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
        assert!(f.call.agents_called().is_empty());
    }
}
