//! Console command handler
//!
//! Opens a shell in the remote root, or runs `command=` there.

use anyhow::Result;

use super::{interruptible, Invocation, Outcome};
use crate::error::DeployError;
use crate::remote::RemoteShell;

/// Handle the console command
pub fn handle_console(invocation: &Invocation<'_>) -> Result<Outcome> {
    let options = invocation.options;
    let shell = RemoteShell::new(options);

    let command = match options.command.as_deref() {
        Some(script) => shell.script(script, true),
        None => shell.login_shell(),
    };

    let Some(code) = interruptible(invocation.runner.run_interactive(&command))? else {
        return Ok(Outcome::Cancelled);
    };

    // A login shell reports the status of the last command typed, so only a
    // one-off command or an ssh failure (255) counts as an error
    if code != 0 && (options.command.is_some() || code == 255) {
        return Err(DeployError::RemoteOperationFailed {
            command: command.to_string(),
            code,
            output: "see remote output above".to_string(),
        }
        .into());
    }

    log::debug!("Remote session ended with exit code {code}");
    Ok(Outcome::Completed)
}
