//! CLI argument parsing for specrun.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};

/// specrun: resumable spec-driven workflow runner.
///
/// Workflow commands (specify, plan, tasks, ...) are delegated to agents picked
/// by capability. Progress is checkpointed per feature under `.specrun/` and
/// artifacts land in `specs/<feature>/`.
#[derive(Parser, Debug)]
#[command(name = "specrun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// More log output (-v info, -vv debug). `SPECRUN_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Feature id (e.g. 001-user-auth). Defaults to the current git branch.
    #[arg(long, global = true)]
    pub feature: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for specrun.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create `.specrun/` with a default config and a sample agent catalog.
    Init(InitArgs),

    /// Inspect the agent catalog.
    Agents(AgentsCommand),

    /// Run one or more workflow commands as a single batch.
    ///
    /// Commands requested together run concurrently unless one needs
    /// another's output (plan after specify, tasks after plan, ...).
    Run(RunArgs),

    /// Inspect or adjust the feature's workflow state.
    State(StateCommand),

    /// List or clear feature locks.
    Lock(LockCommand),

    /// Interactive session (`/specify ...`, `/plan`, `agents disable ...`).
    Repl(ReplArgs),
}

/// Arguments for the `init` command.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config and agent catalog.
    #[arg(long)]
    pub force: bool,
}

/// Agent subcommands.
#[derive(Parser, Debug)]
pub struct AgentsCommand {
    #[command(subcommand)]
    pub action: AgentsAction,
}

#[derive(Subcommand, Debug)]
pub enum AgentsAction {
    /// List agents with their capabilities and priority.
    List {
        /// Include disabled agents.
        #[arg(long)]
        all: bool,
    },

    /// Show one agent's profile.
    Show {
        /// Agent name (case-insensitive).
        name: String,
    },
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Workflow commands, e.g. `specify plan` or `/tasks`.
    #[arg(required = true, num_args = 1..)]
    pub commands: Vec<String>,

    /// Free-form input (the feature description for `specify`).
    #[arg(short, long)]
    pub input: Option<String>,

    /// Use these agents, in order, instead of capability selection.
    #[arg(long, value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Maximum number of concurrent agent calls.
    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

/// State subcommands.
#[derive(Parser, Debug)]
pub struct StateCommand {
    #[command(subcommand)]
    pub action: StateAction,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Show the current phase, history and suggested next step.
    Show {
        /// Print the raw checkpoint as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Move back to an earlier phase. History is kept.
    Reenter {
        /// Target phase (draft, specified, planned, tasked, implementing).
        phase: String,
    },

    /// Mark the current phase complete and advance.
    Complete {
        /// The phase being completed; must be the current one.
        phase: String,
    },
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// List all active locks.
    ///
    /// Shows feature locks with their age and owner.
    List,

    /// Clear a specific lock.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LockClearArgs),
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Feature id whose lock should be cleared.
    pub lock_id: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `repl` command.
#[derive(Parser, Debug)]
pub struct ReplArgs {
    /// Maximum number of concurrent agent calls.
    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["specrun", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init(InitArgs { force: false })));
    }

    #[test]
    fn parse_run_full() {
        let cli = Cli::try_parse_from([
            "specrun",
            "run",
            "specify",
            "/plan",
            "--input",
            "magic link login",
            "--agents",
            "archie,tess",
            "--feature",
            "001-auth",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.feature.as_deref(), Some("001-auth"));
        if let Command::Run(args) = cli.command {
            assert_eq!(args.commands, vec!["specify", "/plan"]);
            assert_eq!(args.input.as_deref(), Some("magic link login"));
            assert_eq!(args.agents, vec!["archie", "tess"]);
            assert_eq!(args.max_concurrency, None);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn parse_run_requires_a_command() {
        assert!(Cli::try_parse_from(["specrun", "run"]).is_err());
    }

    #[test]
    fn parse_agents_list_all() {
        let cli = Cli::try_parse_from(["specrun", "agents", "list", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Agents(AgentsCommand {
                action: AgentsAction::List { all: true }
            })
        ));
    }

    #[test]
    fn parse_state_reenter() {
        let cli = Cli::try_parse_from(["specrun", "state", "reenter", "specified"]).unwrap();
        if let Command::State(StateCommand {
            action: StateAction::Reenter { phase },
        }) = cli.command
        {
            assert_eq!(phase, "specified");
        } else {
            panic!("Expected State Reenter command");
        }
    }

    #[test]
    fn parse_lock_clear() {
        let cli = Cli::try_parse_from(["specrun", "lock", "clear", "001-auth", "--force"]).unwrap();
        if let Command::Lock(LockCommand {
            action: LockAction::Clear(args),
        }) = cli.command
        {
            assert_eq!(args.lock_id, "001-auth");
            assert!(args.force);
        } else {
            panic!("Expected Lock Clear command");
        }
    }

    #[test]
    fn global_feature_after_subcommand() {
        let cli = Cli::try_parse_from(["specrun", "state", "show", "--feature", "002-x"]).unwrap();
        assert_eq!(cli.feature.as_deref(), Some("002-x"));
    }
}
