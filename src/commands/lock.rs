//! Implementation of the `specrun lock` commands.

use specrun::config::Config;
use specrun::context::WorkspaceContext;
use specrun::error::{Result, SpecrunError};
use specrun::locks::{self, LockInfo};

pub fn cmd_list(ctx: &WorkspaceContext, config: &Config) -> Result<()> {
    let locks = locks::list_locks(ctx, config.lock_stale_minutes)?;

    if locks.is_empty() {
        println!("No active locks.");
        return Ok(());
    }

    println!("Active locks ({}):", locks.len());
    println!();

    for lock in &locks {
        println!("  {}:", lock.name);
        print_details(lock, "    ");
        if lock.is_stale {
            println!("    Status:     STALE (exceeds {} min threshold)", config.lock_stale_minutes);
        }
        println!();
    }

    let stale_count = locks.iter().filter(|l| l.is_stale).count();
    if stale_count > 0 {
        println!(
            "Note: {} lock(s) are stale. Use `specrun lock clear <feature> --force` to clear.",
            stale_count
        );
    }

    Ok(())
}

pub fn cmd_clear(ctx: &WorkspaceContext, config: &Config, lock_id: &str, force: bool) -> Result<()> {
    if !force {
        return Err(SpecrunError::UserError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a lock while its holder is still running can corrupt the workflow state.\n\
             Only clear locks if you are certain the lock holder has crashed.\n\n\
             To clear the lock, run:\n  specrun lock clear {} --force",
            lock_id
        )));
    }

    let cleared = locks::clear_lock(ctx, lock_id, config.lock_stale_minutes)?;
    tracing::warn!(
        lock = %cleared.name,
        owner = %cleared.metadata.owner,
        was_stale = cleared.is_stale,
        "lock force-cleared"
    );

    println!("Cleared lock: {}", cleared.name);
    println!();
    println!("Lock details:");
    print_details(&cleared, "  ");
    if cleared.is_stale {
        println!("  Status:     was STALE");
    }

    Ok(())
}

fn print_details(lock: &LockInfo, indent: &str) {
    println!("{}Owner:      {}", indent, lock.metadata.owner);
    if let Some(pid) = lock.metadata.pid {
        println!("{}PID:        {}", indent, pid);
    }
    println!(
        "{}Created:    {}",
        indent,
        lock.metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("{}Age:        {}", indent, lock.metadata.age_string());
    println!("{}Action:     {}", indent, lock.metadata.action);
    println!("{}Path:       {}", indent, lock.path.display());
}
