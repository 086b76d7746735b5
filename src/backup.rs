//! Dated backup directories, retention and recovery patches.
//!
//! Each push picks one [`BackupEpoch`]. rsync moves everything it overwrites or
//! deletes into that directory, a patch describing the push is appended next
//! to it, and epochs older than the retention window are purged.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::config::EffectiveOptions;
use crate::diff::git_diff;
use crate::error::DeployError;
use crate::itemize::{ChangeKind, ChangeSet};
use crate::process::ProcessRunner;
use crate::remote::RemoteShell;
use crate::snapshot::{self, FileContent};

/// Directory name format of an epoch, e.g. `20250314150926`
pub const EPOCH_FORMAT: &str = "%Y%m%d%H%M%S";

/// The backup directory chosen for one push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEpoch {
    backup_path: String,
    name: String,
}

impl BackupEpoch {
    pub fn at<Tz: TimeZone>(backup_path: &str, now: DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            backup_path: backup_path.trim_end_matches('/').to_string(),
            name: now.format(EPOCH_FORMAT).to_string(),
        }
    }

    pub fn now(backup_path: &str) -> Self {
        Self::at(backup_path, Local::now())
    }

    /// Timestamp directory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory relative to the remote root
    pub fn relative_dir(&self) -> String {
        format!("{}/{}", self.backup_path, self.name)
    }

    /// Patch file relative to the remote root
    pub fn patch_path(&self) -> String {
        format!("{}/{}.patch", self.relative_dir(), self.name)
    }
}

/// Parse an epoch directory name; anything else is not an epoch
pub fn parse_epoch_name(name: &str) -> Option<NaiveDateTime> {
    if name.len() != 14 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(name, EPOCH_FORMAT).ok()
}

/// Parse `<number> <unit>[s] [ago]`.
///
/// Months are 30 days and years 365 days; there is no calendar arithmetic.
pub fn parse_retention(value: &str) -> Result<chrono::Duration, DeployError> {
    let invalid = || DeployError::RetentionDateInvalid {
        value: value.to_string(),
    };

    let lowered = value.trim().to_ascii_lowercase();
    let mut words = lowered.split_whitespace();

    let amount: i64 = words
        .next()
        .and_then(|n| n.parse().ok())
        .filter(|n| *n >= 0)
        .ok_or_else(invalid)?;
    let unit = words.next().ok_or_else(invalid)?;
    match words.next() {
        None | Some("ago") => {}
        Some(_) => return Err(invalid()),
    }
    if words.next().is_some() {
        return Err(invalid());
    }

    let seconds_per_unit: i64 = match unit.strip_suffix('s').unwrap_or(unit) {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 7 * 86_400,
        "month" => 30 * 86_400,
        "year" => 365 * 86_400,
        _ => return Err(invalid()),
    };

    amount
        .checked_mul(seconds_per_unit)
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(invalid)
}

/// Oldest epoch timestamp that survives a purge at `now`
pub fn retention_cutoff(value: &str, now: NaiveDateTime) -> Result<NaiveDateTime, DeployError> {
    let window = parse_retention(value)?;
    now.checked_sub_signed(window).ok_or_else(|| DeployError::RetentionDateInvalid {
        value: value.to_string(),
    })
}

/// Epoch names strictly older than `cutoff`; non-epoch names are ignored
pub fn select_expired<S: AsRef<str>>(names: &[S], cutoff: NaiveDateTime) -> Vec<String> {
    names
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| parse_epoch_name(name).is_some_and(|ts| ts < cutoff))
        .map(str::to_string)
        .collect()
}

/// Build the recovery patch for a finished push.
///
/// Every content change of the confirmed dry run is diffed from its backup
/// copy (or `/dev/null` when rsync had nothing to back up) to what is now on
/// the remote, i.e. the local working tree.
pub fn build_patch(
    epoch: &BackupEpoch,
    changes: &ChangeSet,
    options: &EffectiveOptions,
    backup: &snapshot::Snapshot,
) -> Result<String> {
    let patch_path = epoch.patch_path();
    let backup_prefix = options.backup_path.as_ref().map(|p| format!("{p}/"));
    let mut patch = String::new();

    for change in changes.sorted_diffable() {
        let path = change.path.as_str();
        let in_backups = backup_prefix.as_deref().is_some_and(|p| path.starts_with(p));
        if path == patch_path || in_backups {
            continue;
        }

        let current = match &change.kind {
            ChangeKind::Delete => None,
            ChangeKind::CreateSymlink { target } => Some(FileContent::symlink(target)),
            _ => FileContent::read_local(&options.project_root, path)?,
        };

        patch.push_str(&git_diff(path, backup.get(path), current.as_ref()));
    }

    Ok(patch)
}

/// Remote-side backup operations
pub struct BackupStore<'a> {
    options: &'a EffectiveOptions,
    runner: &'a dyn ProcessRunner,
    shell: RemoteShell<'a>,
}

impl<'a> BackupStore<'a> {
    pub fn new(options: &'a EffectiveOptions, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            options,
            runner,
            shell: RemoteShell::new(options),
        }
    }

    fn backup_path(&self) -> Result<&str> {
        self.options
            .backup_path
            .as_deref()
            .context("Backups are disabled (backup_path=false)")
    }

    /// Names of every entry directly under the remote backup root
    pub fn list(&self) -> Result<Vec<String>> {
        let backup_path = self.backup_path()?;
        let command = self.shell.command(&[
            "sh",
            "-c",
            r#"if [ -d "$1" ]; then ls -1 -- "$1"; fi"#,
            "sh",
            backup_path,
        ]);
        let output = self.runner.run_checked(&command, None)?;

        let mut names: Vec<String> = output
            .stdout_text()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove every epoch older than the retention window; returns the
    /// removed names
    pub fn purge(&self, now: NaiveDateTime) -> Result<Vec<String>> {
        let cutoff = retention_cutoff(&self.options.backup_retention, now)?;
        let expired = select_expired(&self.list()?, cutoff);

        if expired.is_empty() {
            log::debug!("No backups older than {cutoff}");
            return Ok(expired);
        }

        let backup_path = self.backup_path()?;
        let targets: Vec<String> = expired
            .iter()
            .map(|name| format!("{backup_path}/{name}"))
            .collect();
        let mut words = vec!["rm", "-rf", "--"];
        words.extend(targets.iter().map(String::as_str));

        self.runner
            .run_checked(&self.shell.command(&words), None)
            .context("Failed to remove expired backups")?;

        log::info!("Purged {} expired backups", expired.len());
        Ok(expired)
    }

    /// Diff the just-materialized epoch against the working tree
    pub fn generate_patch(&self, epoch: &BackupEpoch, changes: &ChangeSet) -> Result<String> {
        let backup = snapshot::fetch_directory(self.runner, &self.shell, &epoch.relative_dir())
            .context("Failed to fetch backup directory")?;
        build_patch(epoch, changes, self.options, &backup)
    }

    /// Append `patch` to the epoch's patch file on the remote
    pub fn upload_patch(&self, epoch: &BackupEpoch, patch: &str) -> Result<()> {
        let command = self.shell.command(&[
            "sh",
            "-c",
            r#"mkdir -p "$1" && cat >> "$2""#,
            "sh",
            &epoch.relative_dir(),
            &epoch.patch_path(),
        ]);
        self.runner
            .run_checked(&command, Some(patch.as_bytes()))
            .context("Failed to upload patch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::itemize::classify;
    use crate::process::fake::FakeRunner;
    use crate::remote::test_support::options;
    use crate::snapshot::test_archive;
    use chrono::NaiveDate;
    use rstest::rstest;
    use std::fs;
    use tempfile::TempDir;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_epoch_naming() {
        let now = Local.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let epoch = BackupEpoch::at(".backups/", now);
        assert_eq!(epoch.name(), "20250314150926");
        assert_eq!(epoch.relative_dir(), ".backups/20250314150926");
        assert_eq!(
            epoch.patch_path(),
            ".backups/20250314150926/20250314150926.patch"
        );
    }

    #[test]
    fn test_thirty_days_is_exact() {
        let cutoff = retention_cutoff("30 days ago", noon()).unwrap();
        assert_eq!((noon() - cutoff).num_seconds(), 2_592_000);
    }

    #[rstest]
    #[case("1 second", 1)]
    #[case("5 minutes ago", 300)]
    #[case("2 hours", 7_200)]
    #[case("1 day ago", 86_400)]
    #[case("2 weeks", 1_209_600)]
    #[case("1 month ago", 2_592_000)]
    #[case("1 Year Ago", 31_536_000)]
    fn test_retention_units(#[case] value: &str, #[case] seconds: i64) {
        assert_eq!(parse_retention(value).unwrap().num_seconds(), seconds);
    }

    #[rstest]
    #[case("")]
    #[case("thirty days")]
    #[case("30")]
    #[case("30 fortnights")]
    #[case("30 days before")]
    #[case("-3 days")]
    #[case("30 days ago please")]
    fn test_retention_rejects(#[case] value: &str) {
        assert!(matches!(
            parse_retention(value),
            Err(DeployError::RetentionDateInvalid { .. })
        ));
    }

    #[test]
    fn test_select_expired() {
        let cutoff = retention_cutoff("30 days ago", noon()).unwrap();
        let names = [
            "20250101000000", // older than cutoff
            "20250301115959", // one second before cutoff
            "20250301120000", // exactly at cutoff, kept
            "20250330000000", // recent
            "latest",
            "2025",
            "2025030112000x",
        ];
        assert_eq!(
            select_expired(&names, cutoff),
            vec!["20250101000000".to_string(), "20250301115959".to_string()]
        );
    }

    #[test]
    fn test_build_patch_uses_backup_or_dev_null() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("index.html"), "<h1>new</h1>\n").unwrap();
        fs::write(root.join("added.txt"), "fresh\n").unwrap();
        let opts = options(root);
        let epoch = BackupEpoch::at(".backups", Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());

        let backup = snapshot::Snapshot::from_archive(&test_archive::build(
            &[("index.html", "<h1>old</h1>\n"), ("gone.txt", "bye\n")],
            &[],
        ))
        .unwrap();
        let changes = classify(
            ">f.st...... index.html\n>f+++++++++ added.txt\n*deleting   gone.txt\n",
        );

        let patch = build_patch(&epoch, &changes, &opts, &backup).unwrap();

        assert!(patch.contains("--- /dev/null\n+++ b/added.txt\n"));
        assert!(patch.contains("-<h1>old</h1>\n+<h1>new</h1>\n"));
        assert!(patch.contains("deleted file mode 100644"));
        assert!(patch.contains("--- a/gone.txt\n+++ /dev/null\n"));
        assert!(patch.contains("-bye"));
    }

    #[test]
    fn test_purge_removes_only_expired() {
        let temp = TempDir::new().unwrap();
        let opts = options(temp.path());
        let runner = FakeRunner::new(|cmd| {
            if cmd.args[1].contains("ls -1") {
                FakeRunner::ok(b"20240101000000\n20250330000000\nnotes.txt\n")
            } else {
                FakeRunner::ok(b"")
            }
        });

        let removed = BackupStore::new(&opts, &runner).purge(noon()).unwrap();

        assert_eq!(removed, vec!["20240101000000".to_string()]);
        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[1].contains("rm -rf -- .backups/20240101000000"));
        assert!(!commands[1].contains("20250330000000"));
    }

    #[test]
    fn test_purge_with_nothing_expired_makes_one_call() {
        let temp = TempDir::new().unwrap();
        let opts = options(temp.path());
        let runner = FakeRunner::new(|_| FakeRunner::ok(b"20250330000000\n"));

        let removed = BackupStore::new(&opts, &runner).purge(noon()).unwrap();
        assert!(removed.is_empty());
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_upload_patch_appends_via_stdin() {
        let temp = TempDir::new().unwrap();
        let opts = options(temp.path());
        let runner = FakeRunner::new(|_| FakeRunner::ok(b""));
        let epoch = BackupEpoch::at(".backups", Local.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap());

        BackupStore::new(&opts, &runner)
            .upload_patch(&epoch, "diff --git a/x b/x\n")
            .unwrap();

        let calls = runner.calls.borrow();
        let (command, stdin) = &calls[0];
        assert!(command.args[1].contains("cat >>"));
        assert!(command.args[1].ends_with(".backups/20250102030405 .backups/20250102030405/20250102030405.patch"));
        assert_eq!(stdin.as_deref(), Some(&b"diff --git a/x b/x\n"[..]));
    }
}
