//! Interactive session: `specrun repl`.
//!
//! One session (registry, workflow machine, event log) lives for the whole
//! loop, so `agents disable` sticks until exit.

use super::{agents, open_session, run, state};
use regex::Regex;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use specrun::context::WorkspaceContext;
use specrun::error::{Result, SpecrunError};
use specrun::session::{Session, WorkflowRequest};
use specrun::workflow::CommandKind;
use std::sync::LazyLock;

/// `--agent name` or `--agents a,b` anywhere after a command.
static AGENT_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)--agents?(?:[=\s]+(\S+)|$)").expect("valid regex")
});

const HELP: &str = "\
Workflow:
  /specify <description>     write spec.md
  /plan, /tasks, ...         run one workflow command (optional input after it)
  run <cmd> <cmd> ...        run several commands as one batch
  ... --agents a,b           use these agents, in order (also --agent name)
Agents:
  agents list [--all]
  agents show <name>
  agents enable <name>
  agents disable <name>
Other:
  state                      current phase and history
  help
  exit";

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplAction {
    Run(WorkflowRequest),
    AgentsList { all: bool },
    AgentsShow(String),
    AgentsEnable(String),
    AgentsDisable(String),
    State,
    Help,
    Exit,
}

pub async fn cmd_repl(
    ctx: WorkspaceContext,
    feature: Option<String>,
    max_concurrency: Option<usize>,
) -> Result<()> {
    let history = ctx.state_dir.join("history");
    let mut session = open_session(ctx, feature, max_concurrency)?;
    let mut editor = DefaultEditor::new()
        .map_err(|e| SpecrunError::UserError(format!("failed to start line editor: {}", e)))?;
    let _ = editor.load_history(&history);

    println!(
        "specrun: feature {} at phase '{}'. Type `help` for commands.",
        session.feature(),
        session.machine().state().current_phase
    );

    loop {
        let prompt = format!("{}> ", session.machine().state().current_phase);
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("Use `exit` to quit.");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                return Err(SpecrunError::UserError(format!("failed to read input: {}", e)));
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let action = match parse_line(line) {
            Ok(action) => action,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };
        if action == ReplAction::Exit {
            break;
        }
        if let Err(e) = handle(&mut session, action).await {
            eprintln!("Error: {}", e);
        }
    }

    if let Some(parent) = history.parent()
        && parent.is_dir()
    {
        let _ = editor.save_history(&history);
    }
    Ok(())
}

async fn handle(session: &mut Session, action: ReplAction) -> Result<()> {
    match action {
        ReplAction::Run(request) => run::execute(session, &request).await?,
        ReplAction::AgentsList { all } => print!("{}", agents::render_list(session.registry(), all)),
        ReplAction::AgentsShow(name) => {
            print!("{}", agents::render_profile(session.registry(), &name)?)
        }
        ReplAction::AgentsEnable(name) => {
            println!("Enabled '{}' for this session.", session.enable_agent(&name)?)
        }
        ReplAction::AgentsDisable(name) => {
            println!("Disabled '{}' for this session.", session.disable_agent(&name)?)
        }
        ReplAction::State => {
            session.machine_mut().reload()?;
            print!("{}", state::render_state(session.machine().state()));
        }
        ReplAction::Help => println!("{}", HELP),
        ReplAction::Exit => {}
    }
    Ok(())
}

pub(crate) fn parse_line(line: &str) -> Result<ReplAction> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "exit" | "quit" | "/exit" | "/quit" => return Ok(ReplAction::Exit),
        "help" | "/help" | "?" => return Ok(ReplAction::Help),
        "state" | "/state" => return Ok(ReplAction::State),
        "agents" | "/agents" => return parse_agents(rest),
        "run" => {
            let (rest, agents) = take_agent_override(rest)?;
            let commands = rest
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<Vec<CommandKind>>>()?;
            if commands.is_empty() {
                return Err(SpecrunError::UserError("usage: run <command> <command> ...".into()));
            }
            return Ok(ReplAction::Run(with_override(WorkflowRequest::new(commands), agents)));
        }
        _ => {}
    }

    if head.starts_with('/') {
        let kind: CommandKind = head.parse()?;
        let (rest, agents) = take_agent_override(rest)?;
        let mut request = WorkflowRequest::new(vec![kind]);
        if !rest.is_empty() {
            request = request.with_input(rest);
        }
        return Ok(ReplAction::Run(with_override(request, agents)));
    }

    Err(SpecrunError::UserError(format!(
        "unknown input '{}'. Type `help` for commands.",
        head
    )))
}

/// Strip an agent override flag from `rest`, returning the remaining text.
fn take_agent_override(rest: &str) -> Result<(String, Option<Vec<String>>)> {
    let Some(caps) = AGENT_FLAG.captures(rest) else {
        return Ok((rest.to_string(), None));
    };
    let usage = || SpecrunError::UserError("usage: --agents <name>[,<name>...]".into());

    let names: Vec<String> = match caps.get(1) {
        Some(value) if !value.as_str().starts_with("--") => value
            .as_str()
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect(),
        _ => return Err(usage()),
    };
    if names.is_empty() {
        return Err(usage());
    }

    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let remaining = format!("{}{}", &rest[..whole.start], &rest[whole.end..]);
    Ok((remaining.trim().to_string(), Some(names)))
}

fn with_override(request: WorkflowRequest, agents: Option<Vec<String>>) -> WorkflowRequest {
    match agents {
        Some(agents) => request.with_agents(agents),
        None => request,
    }
}

fn parse_agents(rest: &str) -> Result<ReplAction> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    match words.as_slice() {
        [] | ["list"] => Ok(ReplAction::AgentsList { all: false }),
        ["list", "--all"] => Ok(ReplAction::AgentsList { all: true }),
        ["show", name] => Ok(ReplAction::AgentsShow(name.to_string())),
        ["enable", name] => Ok(ReplAction::AgentsEnable(name.to_string())),
        ["disable", name] => Ok(ReplAction::AgentsDisable(name.to_string())),
        _ => Err(SpecrunError::UserError(
            "usage: agents list [--all] | show <name> | enable <name> | disable <name>".into(),
        )),
    }
}
