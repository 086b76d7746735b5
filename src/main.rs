use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

use deployr::config::{parse_bool, EffectiveOptions, Overrides, ProjectConfig};
use deployr::error::DeployError;
use deployr::handlers::push::PushOutcome;
use deployr::handlers::{backups, console, diff, init, pull, push, Invocation, Outcome};
use deployr::logger::init_logger;
use deployr::process::{Interrupt, SystemRunner};
use deployr::prompt::InquireConfirm;

#[derive(Parser)]
#[command(name = "deployr")]
#[command(about = "Deploy a project directory to a remote server with rsync", long_about = None)]
#[command(version)]
struct Cli {
    /// Command to run
    #[arg(value_enum)]
    command: CommandName,

    /// Options as key=value (label, env, method, become, command, path,
    /// remote_path, rsync_path, ignore, webhook_url, diff, backup_path,
    /// backup_retention, debug)
    #[arg(value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Disable coloured output
    #[arg(long)]
    no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CommandName {
    /// Create deployr.toml and .deployrignore in the current directory
    Init,
    /// Open a shell (or run command=...) in the remote root
    Console,
    /// Show what a push would change as a diff
    Diff,
    /// Copy the remote root into the project
    Pull,
    /// Deploy the project to the remote root
    Push,
    /// List remote backups
    #[value(name = "backups:list")]
    BackupsList,
    /// Remove backups older than the retention window
    #[value(name = "backups:purge")]
    BackupsPurge,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let overrides = Overrides::parse(&cli.options)?;
    let debug = overrides
        .get("debug")
        .map(|value| parse_bool("debug", value))
        .transpose()?
        .unwrap_or(false);
    init_logger(debug);

    let interrupt = Interrupt::install()?;
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    match run(&cli, &overrides, cwd, interrupt) {
        Ok(Outcome::Cancelled) => {
            println!("{}", "Cancelled.".yellow());
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if DeployError::is_interrupt(&e) => {
            println!("\n{}", "Cancelled.".yellow());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn run(cli: &Cli, overrides: &Overrides, cwd: PathBuf, interrupt: Interrupt) -> Result<Outcome> {
    if cli.command == CommandName::Init {
        return init::handle_init(&cwd);
    }

    let (root, config) = ProjectConfig::discover(&cwd)?;
    log::debug!("Project root: {}", root.display());

    let options = EffectiveOptions::resolve(&root, &config, overrides, cli.no_color)?;
    if !options.color {
        colored::control::set_override(false);
    }

    let runner = SystemRunner::new(interrupt);
    let confirm = InquireConfirm;
    let invocation = Invocation {
        options: &options,
        runner: &runner,
        confirm: &confirm,
        cwd,
    };

    match cli.command {
        CommandName::Init => init::handle_init(&invocation.cwd),
        CommandName::Console => console::handle_console(&invocation),
        CommandName::Diff => diff::handle_diff(&invocation),
        CommandName::Pull => pull::handle_pull(&invocation),
        CommandName::Push => match push::handle_push(&invocation)? {
            PushOutcome::NothingToDo => Ok(Outcome::NothingToDo),
            PushOutcome::Cancelled => Ok(Outcome::Cancelled),
            PushOutcome::Done(report) if report.interrupted => Ok(Outcome::Cancelled),
            PushOutcome::Done(report) if !report.failures.is_empty() => {
                anyhow::bail!(
                    "Push transferred files but {} follow-up step(s) failed",
                    report.failures.len()
                )
            }
            PushOutcome::Done(_) => Ok(Outcome::Completed),
        },
        CommandName::BackupsList => backups::handle_backups_list(&invocation),
        CommandName::BackupsPurge => backups::handle_backups_purge(&invocation),
    }
}
