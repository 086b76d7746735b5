//! # deployr
//!
//! A command-line tool for deploying a project directory to a remote server
//! over rsync and ssh, with reviewable diffs and dated remote backups.
//!
//! ## Overview
//!
//! `deployr` mirrors the directory holding `deployr.toml` onto a remote root.
//! Every transfer starts with an rsync dry run; its itemized output is shown
//! as a change list (or a git-style diff) and nothing moves until the
//! operator confirms. Pushes keep everything they overwrite or delete in a
//! timestamped backup directory on the server, together with a recovery
//! patch, and expire old backups automatically.
//!
//! ## Key Features
//!
//! - **Named environments**: `[environments.<name>]` blocks selected with `env=<name>`
//! - **Path restriction**: deploy only `path=` entries (wildcards allowed)
//! - **Diff review**: one archive transfer fetches the remote side of every changed file
//! - **Backups and patches**: per-push epoch directory plus a cumulative patch
//! - **Retention**: `backup_retention = "30 days ago"` purges older epochs
//! - **Hooks**: remote `after` command and an optional webhook per push
//!
//! ## Architecture
//!
//! - Configuration and errors ([`config`], [`error`], [`logger`])
//! - External processes and remote shells ([`process`], [`remote`])
//! - Transfer planning ([`filter`], [`transfer`], [`itemize`])
//! - Review and recovery ([`snapshot`], [`diff`], [`backup`])
//! - Operator interaction and notifications ([`prompt`], [`webhook`])
//! - Command pipelines ([`handlers`])

/// Timestamped backup epochs, retention parsing, purge and recovery patches.
pub mod backup;

/// Project configuration discovery and option resolution.
///
/// Loads `deployr.toml` from the nearest ancestor directory, applies the
/// selected environment and the `key=value` command-line overrides, and
/// produces the immutable [`config::EffectiveOptions`] used by every stage.
pub mod config;

/// Git-style diff rendering, colouring and pagination.
pub mod diff;

/// Error taxonomy shared by all stages.
pub mod error;

/// rsync filter rules: built-in excludes, ignore file and path restriction.
///
/// rsync does not descend into excluded directories, so restricting a
/// deployment to a nested path needs explicit includes for every ancestor
/// directory and excludes for their siblings.
pub mod filter;

/// Command handlers, one per CLI command.
pub mod handlers;

/// Change classification from rsync itemized output.
pub mod itemize;

/// Logging configuration using `env_logger`.
///
/// Console output goes to stderr in a `HH:MM:SS [LEVEL] message` format.
/// `RUST_LOG` selects the level; `debug=true` forces debug output including
/// every composed rsync and ssh command line.
pub mod logger;

/// Process execution seam and Ctrl-C handling.
pub mod process;

/// Yes/no confirmation prompts.
pub mod prompt;

/// ssh command composition for commands run inside the remote root.
pub mod remote;

/// Remote content snapshots decoded from a single tar stream.
pub mod snapshot;

/// rsync command composition for push and pull.
pub mod transfer;

/// Best-effort deployment webhook.
pub mod webhook;
