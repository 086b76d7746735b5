//! Backup command handlers
//!
//! `backups:list` shows every epoch under the remote backup root and
//! `backups:purge` applies the retention window on demand.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use colored::Colorize;

use super::{interruptible, Invocation, Outcome};
use crate::backup::{parse_epoch_name, retention_cutoff, BackupStore};

/// One epoch directory as shown by `backups:list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub taken: NaiveDateTime,
    pub expired: bool,
}

/// Epoch entries among `names`, oldest first. Without a cutoff nothing is
/// marked as expired.
pub fn describe(names: &[String], cutoff: Option<NaiveDateTime>) -> Vec<BackupEntry> {
    let mut entries: Vec<BackupEntry> = names
        .iter()
        .filter_map(|name| {
            let taken = parse_epoch_name(name)?;
            Some(BackupEntry {
                name: name.clone(),
                taken,
                expired: cutoff.is_some_and(|cutoff| taken < cutoff),
            })
        })
        .collect();
    entries.sort_by(|a, b| a.taken.cmp(&b.taken));
    entries
}

/// Handle the backups:list command
pub fn handle_backups_list(invocation: &Invocation<'_>) -> Result<Outcome> {
    let options = invocation.options;
    let store = BackupStore::new(options, invocation.runner);

    let Some(names) = interruptible(store.list())? else {
        return Ok(Outcome::Cancelled);
    };

    let now = Local::now().naive_local();
    let cutoff = match retention_cutoff(&options.backup_retention, now) {
        Ok(cutoff) => Some(cutoff),
        Err(e) => {
            log::warn!("{e}; expiry not shown");
            None
        }
    };

    let entries = describe(&names, cutoff);
    if entries.is_empty() {
        println!("{}", "No backups found".dimmed());
        return Ok(Outcome::NothingToDo);
    }

    println!(
        "{} {}:{}/{}",
        "Backups on".bold(),
        options.server,
        options.remote_path,
        options.backup_path.as_deref().unwrap_or_default()
    );
    for entry in &entries {
        let taken = entry.taken.format("%Y-%m-%d %H:%M:%S");
        if entry.expired {
            println!("  {}  {}  {}", entry.name, taken, "expired".red());
        } else {
            println!("  {}  {}", entry.name.cyan(), taken);
        }
    }

    Ok(Outcome::Completed)
}

/// Handle the backups:purge command
pub fn handle_backups_purge(invocation: &Invocation<'_>) -> Result<Outcome> {
    let store = BackupStore::new(invocation.options, invocation.runner);
    let now = Local::now().naive_local();

    let Some(removed) =
        interruptible(store.purge(now).context("Failed to purge expired backups"))?
    else {
        return Ok(Outcome::Cancelled);
    };

    if removed.is_empty() {
        println!(
            "{} (retention: {})",
            "No expired backups".dimmed(),
            invocation.options.backup_retention
        );
        return Ok(Outcome::NothingToDo);
    }

    for name in &removed {
        println!("{} Removed {}", "✓".green(), name);
    }
    Ok(Outcome::Completed)
}
