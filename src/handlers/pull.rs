//! Pull command handler
//!
//! Mirrors the remote root into the project. Pulls never create remote
//! backups.

use anyhow::Result;
use colored::Colorize;

use super::{dry_run, filter_rules, interruptible, print_changes, run_transfer, Invocation, Outcome};
use crate::transfer::{self, Direction, Variant};

/// Handle the pull command
pub fn handle_pull(invocation: &Invocation<'_>) -> Result<Outcome> {
    let options = invocation.options;
    let rules = filter_rules(invocation)?;

    let preview = transfer::compose(options, Direction::Pull, Variant::DryRun, &rules, None);
    let Some(changes) = interruptible(dry_run(invocation.runner, &preview))? else {
        return Ok(Outcome::Cancelled);
    };

    if changes.is_empty() {
        println!("{}", "Nothing to pull, local copy is up to date".dimmed());
        return Ok(Outcome::NothingToDo);
    }

    print_changes(&changes);

    let question = format!(
        "Pull {} changes from {}:{} into {}?",
        changes.len(),
        options.server,
        options.remote_path,
        options.project_root.display()
    );
    if !invocation.confirm.confirm(&question, false)? {
        println!("\n{}", "Pull cancelled.".yellow());
        return Ok(Outcome::Cancelled);
    }

    let command = transfer::compose(options, Direction::Pull, Variant::Real, &rules, None);
    if interruptible(run_transfer(invocation.runner, &command))?.is_none() {
        println!("\n{}", "Pull interrupted.".yellow());
        return Ok(Outcome::Cancelled);
    }

    println!("\n{}", "✓ Pull complete".green().bold());
    Ok(Outcome::Completed)
}
