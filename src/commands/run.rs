//! Implementation of the `specrun run` command.

use super::open_session;
use crate::cli::RunArgs;
use specrun::context::WorkspaceContext;
use specrun::error::Result;
use specrun::orchestrate::ItemFailure;
use specrun::session::{RunSummary, Session, WorkflowRequest};
use specrun::workflow::CommandKind;
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;

pub async fn cmd_run(ctx: WorkspaceContext, feature: Option<String>, args: RunArgs) -> Result<()> {
    let commands = args
        .commands
        .iter()
        .map(|c| c.parse::<CommandKind>())
        .collect::<Result<Vec<_>>>()?;

    let mut request = WorkflowRequest::new(commands);
    request.input = args.input;
    if !args.agents.is_empty() {
        request.agents = Some(args.agents);
    }

    let mut session = open_session(ctx, feature, args.max_concurrency)?;
    execute(&mut session, &request).await
}

/// Run `request`, cancelling on Ctrl-C, and print the summary.
pub(crate) async fn execute(session: &mut Session, request: &WorkflowRequest) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = session.run(request, &cancel).await;
    watcher.abort();

    let summary = result?;
    print!("{}", render_summary(&summary));
    match summary.failure() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("Cancelling; in-flight agents get a short grace period...");
        cancel.cancel();
    }
}

pub(crate) fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "Feature: {}", summary.feature);
    for (id, outcome) in &summary.report.items {
        match &outcome.result {
            Ok(done) => {
                let mut note = String::new();
                if done.fallback_used {
                    note.push_str(", fallback");
                }
                if done.attempts > 1 {
                    let _ = write!(note, ", {} attempts", done.attempts);
                }
                let _ = writeln!(out, "  ok      {:<14} {}{}", id, done.agent, note);
            }
            Err(ItemFailure::Execution(_)) => {
                let _ = writeln!(out, "  FAILED  {}", id);
            }
            Err(ItemFailure::DependencyFailed { dependency }) => {
                let _ = writeln!(out, "  skipped {:<14} ('{}' did not succeed)", id, dependency);
            }
            Err(ItemFailure::Cancelled) => {
                let _ = writeln!(out, "  cancel  {}", id);
            }
            Err(ItemFailure::Artifact { agent, .. }) => {
                let _ = writeln!(out, "  FAILED  {:<14} {} (not saved)", id, agent);
            }
        }
    }

    if !summary.artifacts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Wrote:");
        for (_, path) in &summary.artifacts {
            let _ = writeln!(out, "  {}", path.display());
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Phase: {}", summary.phase);
    if summary.succeeded()
        && let Some(next) = summary.phase.completing_command()
    {
        let _ = writeln!(out, "Next:  /{}", next);
    }
    out
}
