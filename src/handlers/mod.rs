//! Command handler modules
//!
//! One module per command. Every handler receives an [`Invocation`] holding
//! the resolved options and the process and prompt capabilities, so the
//! pipelines run the same way against a real server or a scripted fake.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::EffectiveOptions;
use crate::error::DeployError;
use crate::filter::FilterRule;
use crate::itemize::{self, ChangeKind, ChangeSet};
use crate::process::{CommandLine, ProcessRunner};
use crate::prompt::Confirm;

pub mod backups;
pub mod console;
pub mod diff;
pub mod init;
pub mod pull;
pub mod push;

/// Everything a command pipeline needs for one run
pub struct Invocation<'a> {
    pub options: &'a EffectiveOptions,
    pub runner: &'a dyn ProcessRunner,
    pub confirm: &'a dyn Confirm,
    /// Directory the command was started from; `path=` is relative to it
    pub cwd: PathBuf,
}

/// How a command ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The dry run found no differences
    NothingToDo,
    /// Declined at a prompt or interrupted
    Cancelled,
}

/// Map an interrupt into `None` so pipelines can end in their cancelled state
pub(crate) fn interruptible<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if DeployError::is_interrupt(&e) => {
            log::debug!("Interrupted: {e:#}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run a composed dry run and classify its itemized output
pub(crate) fn dry_run(runner: &dyn ProcessRunner, command: &CommandLine) -> Result<ChangeSet> {
    let output = runner.run_checked(command, None).context("Dry run failed")?;
    let changes = itemize::classify(&output.stdout_text());
    log::debug!("Dry run reported {} entries", changes.len());
    Ok(changes)
}

/// Run the real transfer attached to the terminal
pub(crate) fn run_transfer(runner: &dyn ProcessRunner, command: &CommandLine) -> Result<()> {
    let code = runner.run_interactive(command)?;
    if code != 0 {
        return Err(DeployError::RemoteOperationFailed {
            command: command.to_string(),
            code,
            output: "see transfer output above".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Print the itemized change list
pub(crate) fn print_changes(changes: &ChangeSet) {
    for change in changes.entries() {
        let line = match &change.kind {
            ChangeKind::CreateFile => format!("  + {}", change.path).green(),
            ChangeKind::ModifyFile => format!("  ~ {}", change.path).yellow(),
            ChangeKind::Delete => format!("  - {}", change.path).red(),
            ChangeKind::CreateSymlink { target } => {
                format!("  + {} -> {}", change.path, target).cyan()
            }
            ChangeKind::DirectoryMarker => format!("    {}/", change.path).dimmed(),
        };
        println!("{line}");
    }

    let files = changes.diffable().count();
    println!(
        "\n{} {} file changes, {} entries in total",
        "Summary:".bold(),
        files,
        changes.len()
    );
}

/// Collect the rule list once per invocation
pub(crate) fn filter_rules(invocation: &Invocation<'_>) -> Result<Vec<FilterRule>> {
    crate::filter::build_filter_rules(invocation.options, &invocation.cwd)
        .context("Failed to build filter rules")
}
