//! Push command handler
//!
//! Dry run, review, confirmation, then the real transfer followed by the
//! post-transfer stages (patch, purge, after hook, webhook). Once the transfer
//! has run nothing is rolled back: a failing later stage is reported and the
//! remaining stages still run.

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use std::fmt;

use super::diff::render_for_review;
use super::{dry_run, filter_rules, interruptible, print_changes, run_transfer, Invocation};
use crate::backup::{BackupEpoch, BackupStore};
use crate::diff::present;
use crate::error::DeployError;
use crate::remote::RemoteShell;
use crate::transfer::{self, Direction, Variant};
use crate::webhook::{self, DeploymentRecord};

/// States a push moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStage {
    Idle,
    DryRunShown,
    TransferRunning,
    BackupMaterialized,
    PatchGenerated,
    PurgeComplete,
    AfterHookRun,
    Done,
}

impl fmt::Display for PushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PushStage::Idle => "idle",
            PushStage::DryRunShown => "dry run shown",
            PushStage::TransferRunning => "transfer running",
            PushStage::BackupMaterialized => "backup materialized",
            PushStage::PatchGenerated => "patch generated",
            PushStage::PurgeComplete => "purge complete",
            PushStage::AfterHookRun => "after hook run",
            PushStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a completed push did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Non-directory entries transferred
    pub files_changed: usize,
    pub epoch: Option<String>,
    /// Remote path of the uploaded patch, when one was written
    pub patch_file: Option<String>,
    pub patch: String,
    pub purged: Vec<String>,
    pub after_hook_ran: bool,
    pub webhook_sent: bool,
    /// `stage: error` for every post-transfer stage that failed
    pub failures: Vec<String>,
    /// Interrupted after the transfer; the stages after it were skipped
    pub interrupted: bool,
}

impl PushReport {
    fn fail(&mut self, stage: &str, err: anyhow::Error) {
        if DeployError::is_interrupt(&err) {
            log::warn!("Interrupted during {stage}, skipping remaining steps");
            self.interrupted = true;
        } else {
            log::error!("{stage} failed: {err:#}");
        }
        self.failures.push(format!("{stage}: {err:#}"));
    }
}

/// Terminal states of a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    NothingToDo,
    Cancelled,
    Done(PushReport),
}

fn enter(stage: PushStage) {
    log::debug!("push: {stage}");
}

/// Handle the push command
pub fn handle_push(invocation: &Invocation<'_>) -> Result<PushOutcome> {
    let options = invocation.options;
    let runner = invocation.runner;
    enter(PushStage::Idle);

    // One epoch for the whole invocation
    let epoch = options.backup_path.as_deref().map(BackupEpoch::now);
    let rules = filter_rules(invocation)?;

    let preview = transfer::compose(
        options,
        Direction::Push,
        Variant::DryRun,
        &rules,
        epoch.as_ref(),
    );
    let Some(changes) = interruptible(dry_run(runner, &preview))? else {
        return Ok(PushOutcome::Cancelled);
    };

    if changes.is_empty() {
        println!("{}", "Nothing to deploy, remote is up to date".dimmed());
        return Ok(PushOutcome::NothingToDo);
    }

    if options.show_diff {
        match interruptible(render_for_review(invocation, &changes))? {
            Some(Some(report)) => present(&report, options.color, options.paginate)?,
            _ => return Ok(PushOutcome::Cancelled),
        }
    } else {
        print_changes(&changes);
    }
    enter(PushStage::DryRunShown);

    let question = format!(
        "Deploy {} changes to {}:{}?",
        changes.len(),
        options.server,
        options.remote_path
    );
    if !invocation.confirm.confirm(&question, false)? {
        println!("\n{}", "Push cancelled.".yellow());
        return Ok(PushOutcome::Cancelled);
    }

    enter(PushStage::TransferRunning);
    let command = transfer::compose(options, Direction::Push, Variant::Real, &rules, epoch.as_ref());
    if interruptible(run_transfer(runner, &command))?.is_none() {
        println!("\n{}", "Push interrupted.".yellow());
        return Ok(PushOutcome::Cancelled);
    }

    let mut report = PushReport {
        files_changed: changes.diffable().count(),
        epoch: epoch.as_ref().map(|e| e.name().to_string()),
        ..Default::default()
    };

    if let Some(epoch) = &epoch {
        enter(PushStage::BackupMaterialized);
        let store = BackupStore::new(options, runner);

        let patched = store.generate_patch(epoch, &changes).and_then(|patch| {
            if !patch.is_empty() {
                store.upload_patch(epoch, &patch)?;
            }
            Ok(patch)
        });
        match patched {
            Ok(patch) if patch.is_empty() => log::debug!("Empty patch, nothing uploaded"),
            Ok(patch) => {
                log::info!("Patch written to {}", epoch.patch_path());
                report.patch_file = Some(epoch.patch_path());
                report.patch = patch;
            }
            Err(e) => report.fail("patch", e),
        }
        enter(PushStage::PatchGenerated);

        if !report.interrupted {
            match store.purge(Local::now().naive_local()) {
                Ok(purged) => report.purged = purged,
                Err(e) => report.fail("purge", e),
            }
        }
        enter(PushStage::PurgeComplete);
    }

    if let Some(after) = options.after.as_deref().filter(|_| !report.interrupted) {
        let hook = RemoteShell::new(options).script(after, false);
        println!("{} {}", "Running after hook:".cyan(), after);
        match runner.run_interactive(&hook) {
            Ok(0) => report.after_hook_ran = true,
            Ok(code) => report.fail(
                "after hook",
                DeployError::RemoteOperationFailed {
                    command: hook.to_string(),
                    code,
                    output: "see hook output above".to_string(),
                }
                .into(),
            ),
            Err(e) => report.fail("after hook", e),
        }
        enter(PushStage::AfterHookRun);
    }

    if let Some(url) = options.webhook_url.as_deref().filter(|_| !report.interrupted) {
        let record = DeploymentRecord::new(
            options,
            report.patch_file.clone(),
            report.patch.clone(),
            report.files_changed,
        );
        report.webhook_sent = webhook::notify(url, &record);
    }

    enter(PushStage::Done);
    print_summary(&report);
    Ok(PushOutcome::Done(report))
}

fn print_summary(report: &PushReport) {
    if report.failures.is_empty() {
        println!("\n{}", "✓ Push complete".green().bold());
    } else {
        println!(
            "\n{} ({} step(s) failed)",
            "Push complete with errors".yellow().bold(),
            report.failures.len()
        );
    }
    println!("  Files changed: {}", report.files_changed);
    if let Some(patch) = &report.patch_file {
        println!("  Patch: {}", patch.cyan());
    }
    if !report.purged.is_empty() {
        println!("  Purged backups: {}", report.purged.join(", ").dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;
    use crate::process::{CommandLine, ProcessOutput};
    use crate::prompt::scripted::ScriptedConfirm;
    use crate::remote::test_support::options;
    use crate::snapshot::test_archive;
    use std::fs;
    use tempfile::TempDir;

    const ITEMIZED: &str = "\
sending incremental file list
>f.st...... index.html
>f+++++++++ added.txt
*deleting   gone.txt
";

    fn is_ls(cmd: &CommandLine) -> bool {
        cmd.args.iter().any(|a| a.contains("ls -1"))
    }

    fn is_tar(cmd: &CommandLine) -> bool {
        cmd.args.iter().any(|a| a.contains("tar -cf"))
    }

    fn scripted_server() -> FakeRunner {
        let backup = test_archive::build(
            &[("index.html", "<h1>old</h1>\n"), ("gone.txt", "bye\n")],
            &[],
        );
        FakeRunner::new(move |cmd| {
            if cmd.program == "rsync" {
                FakeRunner::ok(ITEMIZED.as_bytes())
            } else if is_tar(cmd) {
                FakeRunner::ok(&backup)
            } else if is_ls(cmd) {
                FakeRunner::ok(b"20000101000000\n")
            } else {
                FakeRunner::ok(b"")
            }
        })
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.html"), "<h1>new</h1>\n").unwrap();
        fs::write(temp.path().join("added.txt"), "fresh\n").unwrap();
        temp
    }

    #[test]
    fn test_full_push_runs_every_stage() {
        let temp = project();
        let mut opts = options(temp.path());
        opts.after = Some("php artisan migrate".to_string());
        let runner = scripted_server();
        let confirm = ScriptedConfirm::new(&[true]);
        let invocation = Invocation {
            options: &opts,
            runner: &runner,
            confirm: &confirm,
            cwd: temp.path().to_path_buf(),
        };

        let PushOutcome::Done(report) = handle_push(&invocation).unwrap() else {
            panic!("push did not complete");
        };

        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(report.files_changed, 3);
        assert_eq!(report.purged, vec!["20000101000000".to_string()]);
        assert!(report.after_hook_ran);
        let epoch = report.epoch.clone().unwrap();
        assert_eq!(
            report.patch_file.as_deref(),
            Some(format!(".backups/{epoch}/{epoch}.patch").as_str())
        );
        assert!(report.patch.contains("-<h1>old</h1>\n+<h1>new</h1>"));

        // Dry run and real transfer share the epoch
        let interactive = runner.interactive.borrow();
        let transfer = interactive[0].to_string();
        assert!(transfer.contains(&format!("--backup-dir=.backups/{epoch}")));
        assert!(!transfer.contains("--dry-run"));
        assert!(runner.commands()[0].contains(&format!("--backup-dir=.backups/{epoch}")));

        // Patch appended through stdin
        let calls = runner.calls.borrow();
        let upload = calls
            .iter()
            .find(|(cmd, _)| cmd.args.iter().any(|a| a.contains("cat >>")))
            .expect("patch upload");
        assert_eq!(upload.1.as_deref(), Some(report.patch.as_bytes()));

        // After hook ran remotely in the remote root
        assert!(interactive[1].to_string().contains("cd /var/www/site && php artisan migrate"));
    }

    #[test]
    fn test_declined_push_never_transfers() {
        let temp = project();
        let opts = options(temp.path());
        let runner = scripted_server();
        let confirm = ScriptedConfirm::new(&[false]);
        let invocation = Invocation {
            options: &opts,
            runner: &runner,
            confirm: &confirm,
            cwd: temp.path().to_path_buf(),
        };

        assert_eq!(handle_push(&invocation).unwrap(), PushOutcome::Cancelled);
        assert!(runner.interactive.borrow().is_empty());
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_nothing_to_deploy() {
        let temp = project();
        let opts = options(temp.path());
        let runner = FakeRunner::new(|_| FakeRunner::ok(b"sending incremental file list\n"));
        let confirm = ScriptedConfirm::new(&[]);
        let invocation = Invocation {
            options: &opts,
            runner: &runner,
            confirm: &confirm,
            cwd: temp.path().to_path_buf(),
        };

        assert_eq!(handle_push(&invocation).unwrap(), PushOutcome::NothingToDo);
        assert!(confirm.asked.borrow().is_empty());
    }

    #[test]
    fn test_failed_transfer_propagates() {
        let temp = project();
        let opts = options(temp.path());
        let runner = scripted_server();
        runner.interactive_exit.set(23);
        let confirm = ScriptedConfirm::new(&[true]);
        let invocation = Invocation {
            options: &opts,
            runner: &runner,
            confirm: &confirm,
            cwd: temp.path().to_path_buf(),
        };

        let err = handle_push(&invocation).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::RemoteOperationFailed { code: 23, .. })
        ));
        // No backup stage after a failed transfer
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_purge_failure_does_not_stop_after_hook() {
        let temp = project();
        let mut opts = options(temp.path());
        opts.after = Some("touch deployed".to_string());
        opts.backup_retention = "a fortnight".to_string();
        let runner = scripted_server();
        let confirm = ScriptedConfirm::new(&[true]);
        let invocation = Invocation {
            options: &opts,
            runner: &runner,
            confirm: &confirm,
            cwd: temp.path().to_path_buf(),
        };

        let PushOutcome::Done(report) = handle_push(&invocation).unwrap() else {
            panic!("push did not complete");
        };
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("purge:"));
        assert!(report.after_hook_ran);
    }

    #[test]
    fn test_without_backups_no_backup_stages() {
        let temp = project();
        let mut opts = options(temp.path());
        opts.backup_path = None;
        let runner = FakeRunner::new(|cmd| {
            if cmd.program == "rsync" {
                FakeRunner::ok(ITEMIZED.as_bytes())
            } else {
                ProcessOutput {
                    exit_code: 1,
                    ..Default::default()
                }
            }
        });
        let confirm = ScriptedConfirm::new(&[true]);
        let invocation = Invocation {
            options: &opts,
            runner: &runner,
            confirm: &confirm,
            cwd: temp.path().to_path_buf(),
        };

        let PushOutcome::Done(report) = handle_push(&invocation).unwrap() else {
            panic!("push did not complete");
        };
        assert!(report.epoch.is_none());
        assert!(report.failures.is_empty());
        assert!(!runner.interactive.borrow()[0].to_string().contains("--backup"));
        assert_eq!(runner.commands().len(), 1);
    }
}
