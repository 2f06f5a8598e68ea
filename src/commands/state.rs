//! Implementation of the `specrun state` commands.

use specrun::error::{Result, SpecrunError};
use specrun::session::Session;
use specrun::workflow::{Phase, WorkflowState};
use std::fmt::Write as _;

pub fn cmd_show(session: &Session, json: bool) -> Result<()> {
    let state = session.machine().state();
    if json {
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| SpecrunError::StateError(format!("failed to serialize state: {}", e)))?;
        println!("{}", text);
    } else {
        print!("{}", render_state(state));
    }
    Ok(())
}

pub fn cmd_reenter(session: &mut Session, phase: &str) -> Result<()> {
    let phase: Phase = phase.parse()?;
    let t = session.machine_mut().reenter(phase)?;
    println!("Re-entered '{}' (was '{}').", t.to, t.from);
    Ok(())
}

pub fn cmd_complete(session: &mut Session, phase: &str) -> Result<()> {
    let phase: Phase = phase.parse()?;
    let t = session.machine_mut().complete_phase(phase)?;
    println!("Completed '{}'; now '{}'.", t.from, t.to);
    Ok(())
}

pub(crate) fn render_state(state: &WorkflowState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Feature: {}", state.feature_id);
    let _ = writeln!(out, "Phase:   {}", state.current_phase);
    match (state.suggested_next(), state.suggested_command()) {
        (Some(next), Some(cmd)) => {
            let _ = writeln!(out, "Next:    {} (run /{})", next, cmd);
        }
        (Some(next), None) => {
            let _ = writeln!(out, "Next:    {} (specrun state complete {})", next, state.current_phase);
        }
        (None, _) => {
            let _ = writeln!(out, "Next:    - (workflow completed)");
        }
    }
    if let Some(at) = state.last_checkpoint {
        let _ = writeln!(out, "Saved:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if !state.completed().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "History:");
        for record in state.completed() {
            let what = match record.command {
                Some(cmd) => format!("/{}", cmd),
                None => "complete".to_string(),
            };
            let _ = write!(
                out,
                "  {}  {:<12} {:<14}",
                record.completed_at.format("%Y-%m-%d %H:%M"),
                record.phase.as_str(),
                what
            );
            if let Some(agent) = &record.agent {
                let _ = write!(out, " {}", agent);
            }
            let _ = writeln!(out);
        }
    }

    if !state.reentered().is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Re-entered:");
        for r in state.reentered() {
            let _ = writeln!(out, "  {}  {} -> {}", r.at.format("%Y-%m-%d %H:%M"), r.from, r.to);
        }
    }
    out
}
