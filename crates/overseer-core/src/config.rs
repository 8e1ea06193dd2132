//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `~/.config/overseer/config.toml`
//! 3. Explicit config file (`--config`)
//! 4. Environment variables: `OVERSEER_*`
//!
//! # Example Config
//!
//! ```toml
//! [supervisor]
//! ctl_command = "supervisorctl"
//! ctl_args = ["-c", "/etc/supervisord.conf"]
//! config_dir = "/etc/supervisor/conf.d"
//! escalate_with = "sudo -n"
//!
//! [poll]
//! max_tries = 30
//! interval_ms = 500
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{runner::Invocation, Error, Result};

const DEFAULT_CTL_COMMAND: &str = "supervisorctl";
const DEFAULT_CONFIG_DIR: &str = "/etc/supervisor.d";
const DEFAULT_ADMIN_USER: &str = "root";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
const MAX_COMMAND_TIMEOUT_SECS: u64 = 86_400;
const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_MAX_TRIES: u32 = 20;
const DEFAULT_INTERVAL_MS: u64 = 1000;

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub supervisor: SupervisorSettings,
    pub poll: PollSettings,
}

/// How to reach the supervisor and where its program files live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorSettings {
    pub ctl_command: String,
    /// Arguments placed before every control verb.
    pub ctl_args: Vec<String>,
    pub config_dir: PathBuf,
    /// Identity that owns program files and runs `update`.
    pub admin_user: String,
    /// Privilege prefix for commands run as `admin_user`; empty runs directly.
    pub escalate_with: String,
    /// Zero disables the per-command timeout.
    pub command_timeout_secs: u64,
    /// Exit codes of the status command that still carry a full listing.
    pub status_ok_codes: Vec<i32>,
    pub file_mode: u32,
}

/// Budget for waiting out an in-flight state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    pub max_tries: u32,
    pub interval_ms: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULT IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            ctl_command: DEFAULT_CTL_COMMAND.to_string(),
            ctl_args: Vec::new(),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            admin_user: DEFAULT_ADMIN_USER.to_string(),
            escalate_with: String::new(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            status_ok_codes: vec![0, 3],
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration from all sources with hierarchy
///
/// # Errors
///
/// Returns error if:
/// - A config file is unreadable or malformed TOML
/// - An `OVERSEER_*` variable has an unparseable value
/// - Config values fail validation
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config.merge(load_toml_file(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        config.merge(load_toml_file(path)?);
    }

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

impl SupervisorSettings {
    /// Control command invocation with `args` after the configured leading args.
    pub fn ctl<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let all = self
            .ctl_args
            .iter()
            .cloned()
            .chain(args.into_iter().map(Into::into));
        Invocation::new(self.ctl_command.clone(), all)
    }

    /// Per-command timeout, if enabled.
    #[must_use]
    pub const fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.command_timeout_secs))
        }
    }
}

impl PollSettings {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Get path to global config file
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "overseer")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load a TOML file into a partial Config
///
/// # Errors
///
/// Returns error if the file cannot be read or the TOML is malformed
fn load_toml_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::parse_failed(path, format!("cannot read: {e}")))?;
    toml::from_str(&content).map_err(|e| Error::parse_failed(path, e.to_string()))
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("Invalid {key} value '{value}': {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// MERGE IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════

impl SupervisorSettings {
    fn merge(&mut self, other: Self) {
        let defaults = Self::default();
        if other.ctl_command != defaults.ctl_command {
            self.ctl_command = other.ctl_command;
        }
        if !other.ctl_args.is_empty() {
            self.ctl_args = other.ctl_args;
        }
        if other.config_dir != defaults.config_dir {
            self.config_dir = other.config_dir;
        }
        if other.admin_user != defaults.admin_user {
            self.admin_user = other.admin_user;
        }
        if !other.escalate_with.is_empty() {
            self.escalate_with = other.escalate_with;
        }
        if other.command_timeout_secs != defaults.command_timeout_secs {
            self.command_timeout_secs = other.command_timeout_secs;
        }
        if other.status_ok_codes != defaults.status_ok_codes {
            self.status_ok_codes = other.status_ok_codes;
        }
        if other.file_mode != defaults.file_mode {
            self.file_mode = other.file_mode;
        }
    }
}

impl PollSettings {
    fn merge(&mut self, other: Self) {
        if other.max_tries != DEFAULT_MAX_TRIES {
            self.max_tries = other.max_tries;
        }
        if other.interval_ms != DEFAULT_INTERVAL_MS {
            self.interval_ms = other.interval_ms;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIG METHODS
// ═══════════════════════════════════════════════════════════════════════════

impl Config {
    /// Merge another config into this one (other takes precedence)
    ///
    /// Values equal to the built-in default are treated as unset.
    fn merge(&mut self, other: Self) {
        self.supervisor.merge(other.supervisor);
        self.poll.merge(other.poll);
    }

    /// Apply environment variable overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("OVERSEER_SUPERVISORCTL") {
            self.supervisor.ctl_command = value;
        }
        if let Some(value) = lookup("OVERSEER_CONFIG_DIR") {
            self.supervisor.config_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("OVERSEER_ADMIN_USER") {
            self.supervisor.admin_user = value;
        }
        if let Some(value) = lookup("OVERSEER_ESCALATE_WITH") {
            self.supervisor.escalate_with = value;
        }
        if let Some(value) = lookup("OVERSEER_COMMAND_TIMEOUT_SECS") {
            self.supervisor.command_timeout_secs =
                parse_env("OVERSEER_COMMAND_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("OVERSEER_POLL_MAX_TRIES") {
            self.poll.max_tries = parse_env("OVERSEER_POLL_MAX_TRIES", &value)?;
        }
        if let Some(value) = lookup("OVERSEER_POLL_INTERVAL_MS") {
            self.poll.interval_ms = parse_env("OVERSEER_POLL_INTERVAL_MS", &value)?;
        }
        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.ctl_command.trim().is_empty() {
            return Err(Error::invalid_config("ctl_command cannot be empty"));
        }
        if self.supervisor.config_dir.as_os_str().is_empty() {
            return Err(Error::invalid_config("config_dir cannot be empty"));
        }
        if self.supervisor.admin_user.trim().is_empty() {
            return Err(Error::invalid_config("admin_user cannot be empty"));
        }
        if self.supervisor.status_ok_codes.is_empty() {
            return Err(Error::invalid_config("status_ok_codes cannot be empty"));
        }
        if self.supervisor.file_mode > 0o7777 {
            return Err(Error::invalid_config("file_mode must be at most 0o7777"));
        }
        if self.supervisor.command_timeout_secs > MAX_COMMAND_TIMEOUT_SECS {
            return Err(Error::invalid_config(
                "command_timeout_secs must be at most 86400",
            ));
        }
        if !(1..=1000).contains(&self.poll.max_tries) {
            return Err(Error::invalid_config("poll.max_tries must be 1-1000"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.supervisor.ctl_command, "supervisorctl");
        assert_eq!(config.supervisor.config_dir, PathBuf::from("/etc/supervisor.d"));
        assert_eq!(config.supervisor.admin_user, "root");
        assert_eq!(config.supervisor.file_mode, 0o644);
        assert_eq!(config.supervisor.status_ok_codes, vec![0, 3]);
        assert_eq!(config.poll.max_tries, 20);
        assert_eq!(config.poll.interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ctl_prepends_leading_args() {
        let settings = SupervisorSettings {
            ctl_args: vec!["-c".to_string(), "/etc/supervisord.conf".to_string()],
            ..SupervisorSettings::default()
        };
        let invocation = settings.ctl(["start", "web"]);
        assert_eq!(
            invocation.to_string(),
            "supervisorctl -c /etc/supervisord.conf start web"
        );
    }

    #[test]
    fn test_command_timeout_zero_disables() {
        let settings = SupervisorSettings {
            command_timeout_secs: 0,
            ..SupervisorSettings::default()
        };
        assert_eq!(settings.command_timeout(), None);
        assert_eq!(
            SupervisorSettings::default().command_timeout(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_merge_keeps_defaults_for_unset_values() {
        let mut base = Config::default();
        let override_config = Config {
            supervisor: SupervisorSettings {
                config_dir: PathBuf::from("/etc/supervisor/conf.d"),
                ..SupervisorSettings::default()
            },
            ..Config::default()
        };
        base.merge(override_config);
        assert_eq!(base.supervisor.config_dir, PathBuf::from("/etc/supervisor/conf.d"));
        assert_eq!(base.supervisor.ctl_command, "supervisorctl");
        assert_eq!(base.poll.max_tries, 20);
    }

    #[test]
    fn test_later_file_overrides_earlier() {
        let mut base = Config::default();
        base.merge(Config {
            poll: PollSettings {
                max_tries: 5,
                ..PollSettings::default()
            },
            ..Config::default()
        });
        base.merge(Config {
            poll: PollSettings {
                max_tries: 9,
                ..PollSettings::default()
            },
            ..Config::default()
        });
        assert_eq!(base.poll.max_tries, 9);
    }

    #[test]
    fn test_env_overrides_config() -> Result<()> {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("OVERSEER_SUPERVISORCTL", "/opt/bin/supervisorctl"),
            ("OVERSEER_POLL_MAX_TRIES", "7"),
            ("OVERSEER_POLL_INTERVAL_MS", "250"),
            ("OVERSEER_ESCALATE_WITH", "sudo -n"),
        ]))?;
        assert_eq!(config.supervisor.ctl_command, "/opt/bin/supervisorctl");
        assert_eq!(config.supervisor.escalate_with, "sudo -n");
        assert_eq!(config.poll.max_tries, 7);
        assert_eq!(config.poll.interval_ms, 250);
        Ok(())
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut config = Config::default();
        let result = config.apply_env(env(&[("OVERSEER_POLL_MAX_TRIES", "many")]));
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
        if let Err(e) = result {
            assert!(e.to_string().contains("OVERSEER_POLL_MAX_TRIES"));
        }
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = Config::default();
        config.poll.max_tries = 0;
        assert!(config.validate().is_err());
        config.poll.max_tries = 1000;
        assert!(config.validate().is_ok());

        config.supervisor.file_mode = 0o17777;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_can_clear_value_set_by_file_layer() -> Result<()> {
        let mut config = Config::default();
        config.merge(Config {
            supervisor: SupervisorSettings {
                escalate_with: "sudo -n".to_string(),
                ..SupervisorSettings::default()
            },
            ..Config::default()
        });
        assert_eq!(config.supervisor.escalate_with, "sudo -n");

        config.apply_env(env(&[("OVERSEER_ESCALATE_WITH", "")]))?;
        assert_eq!(config.supervisor.escalate_with, "");
        Ok(())
    }

    #[test]
    fn test_command_timeout_is_bounded() {
        let mut config = Config::default();
        config.supervisor.command_timeout_secs = MAX_COMMAND_TIMEOUT_SECS;
        assert!(config.validate().is_ok());

        config.supervisor.command_timeout_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_huge_env_timeout_rejected_by_validation() -> Result<()> {
        let mut config = Config::default();
        config.apply_env(env(&[(
            "OVERSEER_COMMAND_TIMEOUT_SECS",
            "18446744073709551615",
        )]))?;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_load_explicit_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("overseer.toml");
        std::fs::write(
            &path,
            "[supervisor]\nconfig_dir = \"/srv/supervisor\"\n\n[poll]\ninterval_ms = 10\n",
        )?;

        let config = load_toml_file(&path)?;
        assert_eq!(config.supervisor.config_dir, PathBuf::from("/srv/supervisor"));
        assert_eq!(config.poll.interval_ms, 10);
        assert_eq!(config.poll.max_tries, 20);
        Ok(())
    }

    #[test]
    fn test_malformed_toml_returns_parse_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[supervisor\nconfig_dir = ")?;

        let result = load_toml_file(&path);
        assert!(matches!(result, Err(Error::ParseFailed { .. })));
        Ok(())
    }

    #[test]
    fn test_unknown_keys_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("typo.toml");
        std::fs::write(&path, "[poll]\nmax_retries = 3\n")?;
        assert!(load_toml_file(&path).is_err());
        Ok(())
    }
}
