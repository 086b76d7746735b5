//! rsync invocation composer. Pure functions from options to command lines;
//! nothing here executes anything.

use crate::backup::BackupEpoch;
use crate::config::EffectiveOptions;
use crate::filter::FilterRule;
use crate::process::CommandLine;

/// Which way files flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// local → remote
    Push,
    /// remote → local
    Pull,
}

/// Simulated or real transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    DryRun,
    Real,
}

/// Compose the rsync command line for one transfer.
///
/// `epoch` is only consulted for pushes with backups enabled; pulls never
/// create remote backups.
pub fn compose(
    options: &EffectiveOptions,
    direction: Direction,
    variant: Variant,
    rules: &[FilterRule],
    epoch: Option<&BackupEpoch>,
) -> CommandLine {
    let mut cmd = CommandLine::new("rsync").args([
        "--archive",
        "--compress",
        "--itemize-changes",
        "--delete",
    ]);

    cmd = cmd.arg(format!("--rsh={}", options.method));

    if let Some(rsync_path) = remote_rsync_path(options) {
        cmd = cmd.arg(format!("--rsync-path={rsync_path}"));
    }

    if variant == Variant::DryRun {
        cmd = cmd.arg("--dry-run");
    }

    if direction == Direction::Push && options.backup_path.is_some() {
        if let Some(epoch) = epoch {
            cmd = cmd
                .arg("--backup")
                .arg(format!("--backup-dir={}", epoch.relative_dir()));
        }
    }

    cmd = cmd.args(rules.iter().map(FilterRule::to_arg));

    let local = with_trailing_slash(&options.project_root.to_string_lossy());
    let remote = format!(
        "{}:{}",
        options.server,
        with_trailing_slash(&options.remote_path)
    );

    match direction {
        Direction::Push => cmd.arg(local).arg(remote),
        Direction::Pull => cmd.arg(remote).arg(local),
    }
}

/// `--rsync-path` value, when it differs from a plain `rsync`
fn remote_rsync_path(options: &EffectiveOptions) -> Option<String> {
    match options.become_user.as_deref() {
        Some(user) => Some(format!("sudo -u {} {}", user, options.rsync_path)),
        None if options.rsync_path != "rsync" => Some(options.rsync_path.clone()),
        None => None,
    }
}

/// rsync copies a directory's *contents* only when the source ends in `/`
pub fn with_trailing_slash(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}
