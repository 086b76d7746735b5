use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DeployError;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "deployr.toml";

/// Name of the project ignore file (rsync filter syntax)
pub const IGNORE_FILE: &str = ".deployrignore";

const DEFAULT_METHOD: &str = "ssh";
const DEFAULT_RSYNC_PATH: &str = "rsync";
const DEFAULT_BACKUP_PATH: &str = ".backups";
const DEFAULT_BACKUP_RETENTION: &str = "30 days ago";

/// Option keys accepted as `key=value` on the command line
pub const OPTION_KEYS: &[&str] = &[
    "label",
    "env",
    "method",
    "become",
    "command",
    "path",
    "remote_path",
    "rsync_path",
    "ignore",
    "webhook_url",
    "diff",
    "backup_path",
    "backup_retention",
    "debug",
];

/// One block of settings, either the top level or a named environment.
///
/// Every field is optional so that environments only need to name what they
/// change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    /// Command run on the remote inside `remote_path` after a push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Remote shell used by rsync and for console/snapshot sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Remote user to `sudo -u` into
    #[serde(
        default,
        rename = "become",
        deserialize_with = "string_or_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub become_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
    /// `false` disables backups
    #[serde(
        default,
        deserialize_with = "string_or_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub backup_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_retention: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paginate: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrBool {
    Text(String),
    Flag(bool),
}

/// Keys like `become = true` and `backup_path = false` take either type
fn string_or_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(
        Option::<StringOrBool>::deserialize(deserializer)?.map(|value| match value {
            StringOrBool::Text(text) => text,
            StringOrBool::Flag(flag) => flag.to_string(),
        }),
    )
}

impl Settings {
    /// Overlay every value that `other` sets on top of `self`
    fn overlay(&mut self, other: &Settings) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }

        take(&mut self.server, &other.server);
        take(&mut self.remote_path, &other.remote_path);
        take(&mut self.after, &other.after);
        take(&mut self.method, &other.method);
        take(&mut self.rsync_path, &other.rsync_path);
        take(&mut self.label, &other.label);
        take(&mut self.become_user, &other.become_user);
        take(&mut self.ignore, &other.ignore);
        take(&mut self.backup_path, &other.backup_path);
        take(&mut self.backup_retention, &other.backup_retention);
        take(&mut self.webhook_url, &other.webhook_url);
        take(&mut self.color, &other.color);
        take(&mut self.paginate, &other.paginate);
    }
}

/// Parsed `deployr.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(flatten)]
    pub defaults: Settings,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, Settings>,
}

impl ProjectConfig {
    /// Parse configuration from TOML text
    pub fn parse(content: &str, path: &Path) -> Result<Self, DeployError> {
        toml::from_str(content).map_err(|e| DeployError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let content = fs::read_to_string(path).map_err(|e| DeployError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&content, path)
    }

    /// Find the project root by walking up from `start`, then load its config
    pub fn discover(start: &Path) -> Result<(PathBuf, Self), DeployError> {
        let root = find_project_root(start)?;
        let config = Self::load(&root.join(CONFIG_FILE))?;
        Ok((root, config))
    }
}

/// Return the nearest directory (starting at `start`) that holds `deployr.toml`
pub fn find_project_root(start: &Path) -> Result<PathBuf, DeployError> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| DeployError::ConfigurationMissing {
            start: start.to_path_buf(),
        })
}

/// `key=value` options given on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    values: BTreeMap<String, String>,
}

impl Overrides {
    /// Parse raw `key=value` arguments, rejecting unknown keys
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, DeployError> {
        let mut values = BTreeMap::new();

        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg.split_once('=').ok_or_else(|| DeployError::InvalidOption {
                option: arg.to_string(),
                reason: "expected key=value".to_string(),
            })?;

            if !OPTION_KEYS.contains(&key) {
                return Err(DeployError::InvalidOption {
                    option: arg.to_string(),
                    reason: format!("unknown key, expected one of: {}", OPTION_KEYS.join(", ")),
                });
            }

            values.insert(key.to_string(), value.to_string());
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, DeployError> {
        self.get(key).map(|v| parse_bool(key, v)).transpose()
    }
}

/// Interpret a yes/no option value
pub fn parse_bool(key: &str, value: &str) -> Result<bool, DeployError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" | "" => Ok(false),
        _ => Err(DeployError::InvalidOption {
            option: format!("{key}={value}"),
            reason: "expected a boolean (true/false)".to_string(),
        }),
    }
}

/// Fully resolved options for one invocation.
///
/// Built once in `main` and passed by reference to every stage; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveOptions {
    pub project_root: PathBuf,
    pub environment: Option<String>,
    pub server: String,
    pub remote_path: String,
    /// Space-separated restriction paths (`path=`)
    pub local_path: Option<String>,
    pub ignore: Vec<String>,
    /// Backup root relative to `remote_path`; `None` disables backups
    pub backup_path: Option<String>,
    pub backup_retention: String,
    pub become_user: Option<String>,
    pub after: Option<String>,
    pub webhook_url: Option<String>,
    pub label: Option<String>,
    pub method: String,
    pub rsync_path: String,
    /// Remote command for `console`
    pub command: Option<String>,
    /// Show the full content diff instead of the itemized list before push
    pub show_diff: bool,
    pub color: bool,
    pub paginate: bool,
    pub debug: bool,
}

impl EffectiveOptions {
    /// Merge defaults, the config file, the selected environment and the
    /// command-line overrides, in that order of precedence.
    pub fn resolve(
        project_root: &Path,
        config: &ProjectConfig,
        overrides: &Overrides,
        no_color: bool,
    ) -> Result<Self, DeployError> {
        let mut settings = config.defaults.clone();

        let environment = overrides.get("env").map(str::to_string);
        if let Some(name) = &environment {
            let env = config
                .environments
                .get(name)
                .ok_or_else(|| DeployError::EnvironmentUndefined { name: name.clone() })?;
            settings.overlay(env);
        }

        let text = |key: &str, from_config: &Option<String>| -> Option<String> {
            overrides
                .get(key)
                .map(str::to_string)
                .or_else(|| from_config.clone())
                .filter(|v| !v.trim().is_empty())
        };

        let server = settings.server.clone().filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            DeployError::ConfigInvalid {
                path: project_root.join(CONFIG_FILE),
                message: "'server' is not set".to_string(),
            }
        })?;

        let remote_path = text("remote_path", &settings.remote_path).ok_or_else(|| {
            DeployError::ConfigInvalid {
                path: project_root.join(CONFIG_FILE),
                message: "'remote_path' is not set".to_string(),
            }
        })?;

        let ignore = match overrides.get("ignore") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => settings.ignore.clone().unwrap_or_default(),
        };

        let raw_backup_path = overrides
            .get("backup_path")
            .map(str::to_string)
            .or_else(|| settings.backup_path.clone());
        let backup_path = match raw_backup_path {
            None => Some(DEFAULT_BACKUP_PATH.to_string()),
            Some(path) => match parse_bool("backup_path", &path) {
                Ok(false) => None,
                Ok(true) => Some(DEFAULT_BACKUP_PATH.to_string()),
                Err(_) => Some(path.trim().trim_end_matches('/').to_string()),
            },
        };

        // A boolean `become` toggles root; anything else names the user
        let become_user = match text("become", &settings.become_user) {
            None => None,
            Some(user) => match parse_bool("become", &user) {
                Ok(false) => None,
                Ok(true) => Some("root".to_string()),
                Err(_) => Some(user.trim().to_string()),
            },
        };

        Ok(Self {
            project_root: project_root.to_path_buf(),
            environment,
            server,
            remote_path,
            local_path: overrides
                .get("path")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            ignore,
            backup_path,
            backup_retention: text("backup_retention", &settings.backup_retention)
                .unwrap_or_else(|| DEFAULT_BACKUP_RETENTION.to_string()),
            become_user,
            after: settings.after.clone().filter(|a| !a.trim().is_empty()),
            webhook_url: text("webhook_url", &settings.webhook_url),
            label: text("label", &settings.label),
            method: text("method", &settings.method).unwrap_or_else(|| DEFAULT_METHOD.to_string()),
            rsync_path: text("rsync_path", &settings.rsync_path)
                .unwrap_or_else(|| DEFAULT_RSYNC_PATH.to_string()),
            command: overrides.get("command").map(str::to_string),
            show_diff: overrides.flag("diff")?.unwrap_or(false),
            color: !no_color && settings.color.unwrap_or(true),
            paginate: settings.paginate.unwrap_or(true),
            debug: overrides.flag("debug")?.unwrap_or(false),
        })
    }

    /// Path of the project ignore file, if one exists
    pub fn ignore_file(&self) -> Option<PathBuf> {
        let path = self.project_root.join(IGNORE_FILE);
        path.is_file().then_some(path)
    }
}
