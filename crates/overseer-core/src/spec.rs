//! Service specification: the validated, immutable description of one
//! supervisor-managed program.
//!
//! A specification is built fresh for every reconciliation run, validated
//! once, and then only read. The service name is the sole key correlating the
//! specification, its rendered configuration file and the supervisor's status
//! listing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::{Error, Result};

/// Supervisor's default per-program process name template.
pub const DEFAULT_PROCESS_NAME: &str = "%(program_name)s";

const MAX_NAME_LEN: usize = 255;

/// When the supervisor restarts an exited process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoRestart {
    Never,
    Always,
    /// Restart only on an exit code outside `exitcodes`.
    #[default]
    Unexpected,
}

impl AutoRestart {
    /// Value as written in the supervisor's configuration grammar.
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Never => "false",
            Self::Always => "true",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Signal sent to stop a process.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum StopSignal {
    #[default]
    Term,
    Hup,
    Int,
    Quit,
    Kill,
    Usr1,
    Usr2,
}

/// Log destination and rotation for one output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogStream {
    pub logfile: String,
    pub logfile_maxbytes: String,
    pub logfile_backups: u32,
    pub capture_maxbytes: String,
    pub events_enabled: bool,
}

impl Default for LogStream {
    fn default() -> Self {
        Self {
            logfile: "AUTO".to_string(),
            logfile_maxbytes: "50MB".to_string(),
            logfile_backups: 10,
            capture_maxbytes: "0".to_string(),
            events_enabled: false,
        }
    }
}

/// Desired description of one managed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSpec {
    pub service_name: String,
    pub command: String,
    pub process_name: String,
    pub numprocs: u32,
    pub numprocs_start: u32,
    /// Lower values start earlier and stop later.
    pub priority: u32,
    pub autostart: bool,
    pub autorestart: AutoRestart,
    pub startsecs: u32,
    pub startretries: u32,
    pub exitcodes: Vec<u32>,
    pub stopsignal: StopSignal,
    pub stopwaitsecs: u32,
    pub stopasgroup: Option<bool>,
    pub killasgroup: Option<bool>,
    pub user: Option<String>,
    pub redirect_stderr: bool,
    pub stdout: LogStream,
    pub stderr: LogStream,
    pub environment: BTreeMap<String, String>,
    pub directory: Option<String>,
    pub umask: Option<String>,
    pub serverurl: String,
    pub eventlistener: bool,
    pub eventlistener_buffer_size: Option<u32>,
    pub eventlistener_events: Option<Vec<String>>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            command: String::new(),
            process_name: DEFAULT_PROCESS_NAME.to_string(),
            numprocs: 1,
            numprocs_start: 0,
            priority: 999,
            autostart: true,
            autorestart: AutoRestart::default(),
            startsecs: 1,
            startretries: 3,
            exitcodes: vec![0, 2],
            stopsignal: StopSignal::default(),
            stopwaitsecs: 10,
            stopasgroup: None,
            killasgroup: None,
            user: None,
            redirect_stderr: false,
            stdout: LogStream::default(),
            stderr: LogStream::default(),
            environment: BTreeMap::new(),
            directory: None,
            umask: None,
            serverurl: "AUTO".to_string(),
            eventlistener: false,
            eventlistener_buffer_size: None,
            eventlistener_events: None,
        }
    }
}

impl ServiceSpec {
    /// Create a specification with every optional attribute at its default.
    pub fn new(service_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    /// Validate and return the specification.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` naming the first violated constraint.
    pub fn validated(self) -> Result<Self> {
        self.validate().map(|()| self)
    }

    /// Check every field constraint.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` if:
    /// - the name is empty, too long, or contains whitespace, `:` or `/`
    /// - the command is empty
    /// - `numprocs` is zero, or above one without `%(process_num)` in the template
    /// - `exitcodes` is empty while restarting on unexpected exits
    /// - event listener settings are used on a plain program
    /// - `redirect_stderr` is set on an event listener
    /// - `umask` is not octal
    /// - an environment key is empty or contains `=`
    /// - any rendered text contains a control character such as a newline
    pub fn validate(&self) -> Result<()> {
        let name = &self.service_name;
        let fail = |reason: &str| Err(Error::invalid_spec(name.as_str(), reason));

        if name.is_empty() {
            return fail("service name cannot be empty");
        }
        if name.len() > MAX_NAME_LEN {
            return fail("service name cannot exceed 255 characters");
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c == ':' || c == '/')
        {
            return fail("service name cannot contain whitespace, ':' or '/'");
        }
        if self.command.trim().is_empty() {
            return fail("command cannot be empty");
        }
        if self.numprocs == 0 {
            return fail("numprocs must be at least 1");
        }
        if self.numprocs > 1 && !self.process_name.contains("%(process_num)") {
            return fail("numprocs above 1 requires %(process_num) in process_name");
        }
        if self.exitcodes.is_empty() && self.autorestart == AutoRestart::Unexpected {
            return fail("exitcodes cannot be empty when autorestart is 'unexpected'");
        }
        if !self.eventlistener
            && (self.eventlistener_buffer_size.is_some() || self.eventlistener_events.is_some())
        {
            return fail("eventlistener settings require eventlistener = true");
        }
        if self.eventlistener && self.redirect_stderr {
            return fail("redirect_stderr is not supported for event listeners");
        }
        if let Some(umask) = &self.umask {
            let octal = !umask.is_empty()
                && umask.len() <= 4
                && umask.chars().all(|c| ('0'..='7').contains(&c));
            if !octal {
                return fail("umask must be an octal value such as 022");
            }
        }
        if self
            .environment
            .keys()
            .any(|key| key.is_empty() || key.contains('='))
        {
            return fail("environment keys cannot be empty or contain '='");
        }
        if let Some(field) = self
            .text_fields()
            .find_map(|(field, value)| value.chars().any(char::is_control).then_some(field))
        {
            return fail(&format!("{field} cannot contain control characters"));
        }
        Ok(())
    }

    /// Every free-text value that ends up in the rendered file.
    fn text_fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let streams = [&self.stdout, &self.stderr].into_iter().flat_map(|log| {
            [
                ("logfile", log.logfile.as_str()),
                ("logfile_maxbytes", log.logfile_maxbytes.as_str()),
                ("capture_maxbytes", log.capture_maxbytes.as_str()),
            ]
        });
        let optional = [
            ("user", self.user.as_deref()),
            ("directory", self.directory.as_deref()),
            ("umask", self.umask.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)));
        let events = self
            .eventlistener_events
            .iter()
            .flatten()
            .map(|event| ("events", event.as_str()));

        [
            ("command", self.command.as_str()),
            ("process_name", self.process_name.as_str()),
            ("serverurl", self.serverurl.as_str()),
        ]
        .into_iter()
        .chain(streams)
        .chain(optional)
        .chain(events)
        .chain(self.environment.iter().flat_map(|(key, value)| {
            [("environment", key.as_str()), ("environment", value.as_str())]
        }))
    }

    /// Address used for control commands.
    ///
    /// A non-default process name template means the supervisor multiplexes
    /// numbered copies under the group, so the group wildcard is required.
    #[must_use]
    pub fn target(&self) -> String {
        if self.process_name == DEFAULT_PROCESS_NAME {
            self.service_name.clone()
        } else {
            format!("{}:*", self.service_name)
        }
    }

    /// Name of the supervisor configuration section kind.
    #[must_use]
    pub const fn section_kind(&self) -> &'static str {
        if self.eventlistener {
            "eventlistener"
        } else {
            "program"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web() -> ServiceSpec {
        ServiceSpec::new("web", "/usr/bin/web")
    }

    #[test]
    fn test_defaults_match_supervisor_defaults() {
        let spec = web();
        assert_eq!(spec.process_name, DEFAULT_PROCESS_NAME);
        assert_eq!(spec.numprocs, 1);
        assert_eq!(spec.numprocs_start, 0);
        assert_eq!(spec.priority, 999);
        assert!(spec.autostart);
        assert_eq!(spec.autorestart, AutoRestart::Unexpected);
        assert_eq!(spec.exitcodes, vec![0, 2]);
        assert_eq!(spec.stopsignal, StopSignal::Term);
        assert_eq!(spec.stdout.logfile, "AUTO");
        assert_eq!(spec.stderr.logfile_maxbytes, "50MB");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_target_uses_bare_name_for_default_template() {
        assert_eq!(web().target(), "web");
    }

    #[test]
    fn test_target_uses_group_wildcard_for_custom_template() {
        let spec = ServiceSpec {
            process_name: "%(program_name)s_%(process_num)02d".to_string(),
            numprocs: 2,
            ..web()
        };
        assert_eq!(spec.target(), "web:*");
    }

    #[test]
    fn test_rejects_newlines_in_rendered_text() {
        let injected = ServiceSpec::new("web", "/usr/bin/web\nuser=root");
        assert!(matches!(
            injected.validate(),
            Err(Error::InvalidSpec { ref reason, .. }) if reason.contains("command")
        ));

        let mut env = web();
        env.environment.insert(
            "TOKEN".to_string(),
            "abc\n[program:evil]\ncommand=/bin/sh".to_string(),
        );
        assert!(env.validate().is_err());

        let mut log = web();
        log.stderr.logfile = "/var/log/web.log\r".to_string();
        assert!(log.validate().is_err());

        let listener = ServiceSpec {
            eventlistener: true,
            eventlistener_events: Some(vec!["PROCESS_STATE\nuser=root".to_string()]),
            ..web()
        };
        assert!(listener.validate().is_err());

        let user = ServiceSpec {
            user: Some("www\u{0}".to_string()),
            ..web()
        };
        assert!(user.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_names() {
        for name in ["", "has space", "group:proc", "a/b"] {
            let spec = ServiceSpec::new(name, "/bin/true");
            assert!(spec.validate().is_err(), "name {name:?} should be rejected");
        }
        let long = ServiceSpec::new("x".repeat(256), "/bin/true");
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_command() {
        let result = ServiceSpec::new("web", "  ").validate();
        assert!(matches!(result, Err(Error::InvalidSpec { .. })));
    }

    #[test]
    fn test_numprocs_requires_process_num() {
        let spec = ServiceSpec {
            numprocs: 3,
            ..web()
        };
        let message = spec.validate().map_err(|e| e.to_string());
        assert!(matches!(message, Err(m) if m.contains("%(process_num)")));

        let zero = ServiceSpec {
            numprocs: 0,
            ..web()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_exitcodes_required_for_unexpected_restart() {
        let spec = ServiceSpec {
            exitcodes: Vec::new(),
            ..web()
        };
        assert!(spec.validate().is_err());

        let never = ServiceSpec {
            exitcodes: Vec::new(),
            autorestart: AutoRestart::Never,
            ..web()
        };
        assert!(never.validate().is_ok());
    }

    #[test]
    fn test_eventlistener_combinations() {
        let orphan_settings = ServiceSpec {
            eventlistener_events: Some(vec!["PROCESS_STATE".to_string()]),
            ..web()
        };
        assert!(orphan_settings.validate().is_err());

        let redirected = ServiceSpec {
            eventlistener: true,
            redirect_stderr: true,
            ..web()
        };
        assert!(redirected.validate().is_err());

        let listener = ServiceSpec {
            eventlistener: true,
            eventlistener_buffer_size: Some(10),
            eventlistener_events: Some(vec!["PROCESS_STATE".to_string()]),
            ..web()
        };
        assert!(listener.validate().is_ok());
        assert_eq!(listener.section_kind(), "eventlistener");
    }

    #[test]
    fn test_umask_must_be_octal() {
        let bad = ServiceSpec {
            umask: Some("089".to_string()),
            ..web()
        };
        assert!(bad.validate().is_err());

        let good = ServiceSpec {
            umask: Some("022".to_string()),
            ..web()
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_environment_keys_validated() {
        let mut spec = web();
        spec.environment.insert("A=B".to_string(), "x".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() -> Result<()> {
        let spec: ServiceSpec = toml::from_str(
            r#"
            service_name = "worker"
            command = "/usr/bin/worker --queue jobs"
            autorestart = "always"
            stopsignal = "INT"

            [stdout]
            logfile = "/var/log/worker.log"
            "#,
        )
        .map_err(|e| Error::parse_failed("inline", e.to_string()))?;

        assert_eq!(spec.autorestart, AutoRestart::Always);
        assert_eq!(spec.stopsignal, StopSignal::Int);
        assert_eq!(spec.stdout.logfile, "/var/log/worker.log");
        assert_eq!(spec.stdout.logfile_backups, 10);
        assert_eq!(spec.priority, 999);
        Ok(())
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result: std::result::Result<ServiceSpec, _> =
            toml::from_str("command = \"/bin/true\"\nretries = 4\n");
        assert!(result.is_err());
    }
}
