//! Init command handler
//!
//! Writes a starter `deployr.toml` and an empty `.deployrignore` into the
//! current directory.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use inquire::{InquireError, Text};
use std::fs;
use std::path::{Path, PathBuf};

use super::Outcome;
use crate::config::{CONFIG_FILE, IGNORE_FILE};

/// Render the config template for `server` and `remote_path`
pub fn config_template(server: &str, remote_path: &str) -> String {
    let server = toml::Value::String(server.to_string());
    let remote_path = toml::Value::String(remote_path.to_string());
    format!(
        r#"# Deployment settings for this project.
# Any key below may be overridden on the command line as key=value.

server = {server}
remote_path = {remote_path}

# Remote shell used by rsync, console and diff
# method = "ssh"

# Run as another user on the remote (sudo -u); true means root
# become = "www-data"

# Command run in remote_path after every push
# after = "php artisan migrate"

# Patterns never transferred, in addition to .deployrignore
# ignore = ["node_modules", "*.log"]

# Overwritten and deleted files are kept here on the remote; false disables
# backup_path = ".backups"
# backup_retention = "30 days ago"

# label = "My site"
# webhook_url = "https://hooks.example.com/deploy"

# [environments.staging]
# server = "deploy@staging.example.com"
# remote_path = "/var/www/staging"
"#
    )
}

/// Write the template files into `dir`; refuses to touch an existing config
pub fn write_project(dir: &Path, server: &str, remote_path: &str) -> Result<Vec<PathBuf>> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        bail!("{} already exists, not overwriting it", config_path.display());
    }

    fs::write(&config_path, config_template(server, remote_path))
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    let mut written = vec![config_path];

    let ignore_path = dir.join(IGNORE_FILE);
    if ignore_path.exists() {
        log::info!("Keeping existing {}", ignore_path.display());
    } else {
        fs::write(&ignore_path, "")
            .with_context(|| format!("Failed to write {}", ignore_path.display()))?;
        written.push(ignore_path);
    }

    Ok(written)
}

fn ask(message: &str, placeholder: &str, help: &str) -> Result<Option<String>> {
    let answer = Text::new(message)
        .with_placeholder(placeholder)
        .with_help_message(help)
        .with_validator(inquire::required!("A value is required"))
        .prompt();

    match answer {
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e).context("Failed to read answer"),
    }
}

/// Handle the init command
pub fn handle_init(dir: &Path) -> Result<Outcome> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        bail!("{} already exists, not overwriting it", config_path.display());
    }

    println!("{}", "Setting up deployment for this directory".cyan().bold());

    let Some(server) = ask(
        "Server:",
        "deploy@web1.example.com",
        "ssh destination, as you would pass it to ssh",
    )?
    else {
        return Ok(Outcome::Cancelled);
    };
    let Some(remote_path) = ask(
        "Remote path:",
        "/var/www/site",
        "Directory on the server that mirrors this project",
    )?
    else {
        return Ok(Outcome::Cancelled);
    };

    for path in write_project(dir, &server, &remote_path)? {
        println!("{} Created {}", "✓".green(), path.display());
    }

    Ok(Outcome::Completed)
}
