//! Secure-shell command composition.
//!
//! The remote side always receives a single command string, so every word
//! that came from a file name or an option value is shell-quoted here.

use crate::config::EffectiveOptions;
use crate::process::{shell_quote, CommandLine};

/// Builds ssh invocations that run inside `remote_path` on `server`
pub struct RemoteShell<'a> {
    options: &'a EffectiveOptions,
}

impl<'a> RemoteShell<'a> {
    pub fn new(options: &'a EffectiveOptions) -> Self {
        Self { options }
    }

    /// Run `words` (program plus arguments) inside the remote root
    pub fn command(&self, words: &[&str]) -> CommandLine {
        let quoted: Vec<String> = words.iter().map(|w| shell_quote(w).into_owned()).collect();
        let mut line = self.cd_prefix();
        line.push_str(&self.sudo_prefix());
        line.push_str(&quoted.join(" "));
        self.ssh(false).arg(line)
    }

    /// Run a user-supplied shell snippet (the `after` hook, `command=`)
    /// inside the remote root
    pub fn script(&self, script: &str, tty: bool) -> CommandLine {
        let mut line = self.cd_prefix();
        if self.options.become_user.is_some() {
            line.push_str(&self.sudo_prefix());
            line.push_str("sh -c ");
            line.push_str(&shell_quote(script));
        } else {
            line.push_str(script);
        }
        self.ssh(tty).arg(line)
    }

    /// Interactive login shell in the remote root
    pub fn login_shell(&self) -> CommandLine {
        let mut line = self.cd_prefix();
        match &self.options.become_user {
            Some(_) => {
                line.push_str("exec ");
                line.push_str(&self.sudo_prefix());
                line.push_str("-s");
            }
            None => line.push_str("exec \"${SHELL:-/bin/sh}\" -l"),
        }
        self.ssh(true).arg(line)
    }

    fn ssh(&self, tty: bool) -> CommandLine {
        let mut words = self.options.method.split_whitespace();
        let mut cmd = CommandLine::new(words.next().unwrap_or("ssh")).args(words);
        if tty {
            cmd = cmd.arg("-t");
        }
        cmd.arg(self.options.server.clone())
    }

    fn cd_prefix(&self) -> String {
        format!("cd {} && ", quote_remote_path(&self.options.remote_path))
    }

    fn sudo_prefix(&self) -> String {
        match self.options.become_user.as_deref() {
            Some(user) => format!("sudo -u {} ", shell_quote(user)),
            None => String::new(),
        }
    }
}

/// Quote a remote path while keeping a leading `~/` expandable
pub fn quote_remote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) if rest.is_empty() => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None if path == "~" => "~".to_string(),
        None => shell_quote(path).into_owned(),
    }
}
