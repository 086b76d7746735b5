//! Error taxonomy shared by every deployment stage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the deployment pipeline and its collaborators.
///
/// Command pipelines wrap these in `anyhow::Error` with additional context;
/// callers that need to react to a specific kind use `downcast_ref`.
#[derive(Debug, Error)]
pub enum DeployError {
    /// No `deployr.toml` in the starting directory or any of its ancestors
    #[error("No deployr.toml found in {} or any parent directory", start.display())]
    ConfigurationMissing { start: PathBuf },

    /// The config file exists but could not be parsed
    #[error("Invalid configuration in {}: {message}", path.display())]
    ConfigInvalid { path: PathBuf, message: String },

    /// `env=<name>` names an environment the config file does not define
    #[error("Environment '{name}' is not defined in deployr.toml")]
    EnvironmentUndefined { name: String },

    /// A command-line option could not be understood
    #[error("Invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    /// The backup retention string does not follow `<number> <unit>[s] [ago]`
    #[error("Invalid backup retention '{value}' (expected e.g. '30 days ago')")]
    RetentionDateInvalid { value: String },

    /// An external program (rsync, ssh, tar) exited unsuccessfully
    #[error("'{command}' failed with exit code {code}: {output}")]
    RemoteOperationFailed {
        command: String,
        code: i32,
        output: String,
    },

    /// Best-effort network call (webhook) could not complete
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Ctrl-C arrived while a child process was running
    #[error("Interrupted by user")]
    Interrupted,
}

impl DeployError {
    /// True when the error means the operator stopped the run
    pub fn is_interrupt(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Interrupted)
        )
    }
}
