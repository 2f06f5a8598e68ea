//! Command implementations for specrun.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod agents;
mod console;
mod init;
mod lock;
mod repl;
mod run;
mod state;

use crate::cli::{AgentsAction, Cli, Command, LockAction, StateAction};
use specrun::config::Config;
use specrun::context::WorkspaceContext;
use specrun::error::Result;
use specrun::session::{Session, SessionOptions};
use std::sync::Arc;

/// Dispatch a command to its implementation.
pub async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        feature, command, ..
    } = cli;
    let ctx = WorkspaceContext::resolve()?;

    match command {
        Command::Init(args) => init::cmd_init(&ctx, args.force),
        Command::Agents(agents_cmd) => {
            let config = Config::load(ctx.config_path())?;
            match agents_cmd.action {
                AgentsAction::List { all } => agents::cmd_list(&ctx, &config, all),
                AgentsAction::Show { name } => agents::cmd_show(&ctx, &config, &name),
            }
        }
        Command::Run(args) => run::cmd_run(ctx, feature, args).await,
        Command::State(state_cmd) => {
            let mut session = open_session(ctx, feature, None)?;
            match state_cmd.action {
                StateAction::Show { json } => state::cmd_show(&session, json),
                StateAction::Reenter { phase } => state::cmd_reenter(&mut session, &phase),
                StateAction::Complete { phase } => state::cmd_complete(&mut session, &phase),
            }
        }
        Command::Lock(lock_cmd) => {
            let config = Config::load(ctx.config_path())?;
            match lock_cmd.action {
                LockAction::List => lock::cmd_list(&ctx, &config),
                LockAction::Clear(args) => lock::cmd_clear(&ctx, &config, &args.lock_id, args.force),
            }
        }
        Command::Repl(args) => repl::cmd_repl(ctx, feature, args.max_concurrency).await,
    }
}

/// Open a session that reports progress on the console.
fn open_session(
    ctx: WorkspaceContext,
    feature: Option<String>,
    max_concurrency: Option<usize>,
) -> Result<Session> {
    let session = Session::open(
        ctx,
        SessionOptions {
            feature,
            max_concurrency,
            observers: vec![Arc::new(console::ConsoleSink)],
            ..SessionOptions::default()
        },
    )?;
    for warning in session.machine().warnings() {
        eprintln!("Warning: {}", warning);
    }
    Ok(session)
}
