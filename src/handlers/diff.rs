//! Diff command handler
//!
//! Shows what a push would change as a git-style diff, without changing
//! anything on either side.

use anyhow::{Context, Result};
use colored::Colorize;

use super::{dry_run, filter_rules, interruptible, Invocation, Outcome};
use crate::diff::{present, render_report, LARGE_CHANGE_SET};
use crate::itemize::ChangeSet;
use crate::remote::RemoteShell;
use crate::snapshot;
use crate::transfer::{self, Direction, Variant};

/// Handle the diff command
pub fn handle_diff(invocation: &Invocation<'_>) -> Result<Outcome> {
    let options = invocation.options;
    let rules = filter_rules(invocation)?;
    let command = transfer::compose(options, Direction::Push, Variant::DryRun, &rules, None);

    let Some(changes) = interruptible(dry_run(invocation.runner, &command))? else {
        return Ok(Outcome::Cancelled);
    };

    if changes.diffable().next().is_none() {
        println!("{}", "No differences found".dimmed());
        return Ok(Outcome::NothingToDo);
    }

    let Some(report) = interruptible(render_for_review(invocation, &changes))? else {
        return Ok(Outcome::Cancelled);
    };

    match report {
        Some(report) => {
            present(&report, options.color, options.paginate)?;
            Ok(Outcome::Completed)
        }
        None => Ok(Outcome::Cancelled),
    }
}

/// Fetch the remote side of `changes` in one archive and render the report.
///
/// Returns `None` when the operator declines rendering a large change set.
pub(crate) fn render_for_review(
    invocation: &Invocation<'_>,
    changes: &ChangeSet,
) -> Result<Option<String>> {
    if changes.len() > LARGE_CHANGE_SET {
        let question = format!("{} changes found. Render diff?", changes.len());
        if !invocation.confirm.confirm(&question, false)? {
            return Ok(None);
        }
    }

    let options = invocation.options;
    let shell = RemoteShell::new(options);
    let remote = snapshot::fetch_files(invocation.runner, &shell, &changes.snapshot_paths())
        .context("Failed to fetch remote content")?;

    let report = render_report(changes, &options.project_root, &remote)?;
    Ok(Some(report))
}
