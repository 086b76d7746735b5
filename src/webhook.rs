//! Deployment notifications.
//!
//! One form-encoded POST per completed push. Nothing here may fail a
//! deployment: every error is downgraded to a warning at this boundary.

use std::time::Duration;

use crate::config::EffectiveOptions;
use crate::error::DeployError;

const TIMEOUT: Duration = Duration::from_secs(10);

/// What was deployed, by whom, and the recovery patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub username: String,
    pub label: String,
    pub environment: String,
    pub server: String,
    pub diff_file: String,
    pub diff_contents: String,
    pub files_changed: usize,
}

impl DeploymentRecord {
    pub fn new(
        options: &EffectiveOptions,
        diff_file: Option<String>,
        diff_contents: String,
        files_changed: usize,
    ) -> Self {
        Self {
            username: current_username(),
            label: options.label.clone().unwrap_or_default(),
            environment: options.environment.clone().unwrap_or_default(),
            server: options.server.clone(),
            diff_file: diff_file.unwrap_or_default(),
            diff_contents,
            files_changed,
        }
    }

    /// Form fields in posting order
    pub fn form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("username", self.username.clone()),
            ("label", self.label.clone()),
            ("environment", self.environment.clone()),
            ("server", self.server.clone()),
            ("diff_file", self.diff_file.clone()),
            ("diff_contents", self.diff_contents.clone()),
            ("files_changed", self.files_changed.to_string()),
        ]
    }
}

/// `$USER`, falling back to `$USERNAME` on Windows
pub fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// POST `record` to `url`
pub fn send(url: &str, record: &DeploymentRecord) -> Result<(), DeployError> {
    let unavailable = |e: reqwest::Error| DeployError::NetworkUnavailable(e.to_string());

    let client = reqwest::blocking::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .map_err(unavailable)?;

    client
        .post(url)
        .form(&record.form())
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(unavailable)?;

    Ok(())
}

/// Send the record and only warn when that fails
pub fn notify(url: &str, record: &DeploymentRecord) -> bool {
    match send(url, record) {
        Ok(()) => {
            log::info!("Webhook notified: {url}");
            true
        }
        Err(e) => {
            log::warn!("Webhook {url} skipped: {e}");
            false
        }
    }
}
