//! Status prober: reads the supervisor's status listing.
//!
//! The listing is line oriented, `<group>[:<process>] <STATE> <detail>`. A
//! service the supervisor has never heard of is reported as `Unavailable`;
//! a status command that cannot be run or exits abnormally is an error.

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::SupervisorSettings,
    runner::{CommandRunner, Invocation},
    state::ServiceState,
    Error, Result,
};

/// One parsed line of the status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub group: String,
    /// Process name within the group, for `group:process` lines.
    pub process: Option<String>,
    pub state: ServiceState,
    pub detail: String,
}

/// Queries the supervisor for service state.
pub struct StatusProber<'a, R: CommandRunner> {
    runner: &'a R,
    settings: &'a SupervisorSettings,
}

impl<'a, R: CommandRunner> StatusProber<'a, R> {
    #[must_use]
    pub const fn new(runner: &'a R, settings: &'a SupervisorSettings) -> Self {
        Self { runner, settings }
    }

    /// Current state of `service_name`.
    ///
    /// Matches the first line whose name field is `service_name`, optionally
    /// followed by a `:<process>` suffix, and reads the upper-case state token
    /// after it.
    ///
    /// # Errors
    ///
    /// Returns an invocation error if the status command cannot be run or
    /// exits with a code outside `status_ok_codes`.
    pub fn current_state(&self, service_name: &str) -> Result<ServiceState> {
        let listing = self.listing()?;
        let pattern = format!(
            r"(?m)^{}(?::\S+)?[ \t]+([A-Z]+)",
            regex::escape(service_name)
        );
        let line = Regex::new(&pattern).map_err(|e| {
            Error::invalid_spec(service_name, format!("cannot build status pattern: {e}"))
        })?;

        let state = line
            .captures(&listing)
            .and_then(|caps| caps.get(1))
            .map_or(ServiceState::Unavailable, |token| {
                ServiceState::from_token(token.as_str())
            });

        debug!(service = service_name, %state, "observed state");
        Ok(state)
    }

    /// Every service line in the status listing.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::current_state`].
    pub fn list(&self) -> Result<Vec<StatusEntry>> {
        let listing = self.listing()?;
        let line = Regex::new(r"^([^:\s]+)(?::(\S+))?[ \t]+([A-Z]+)[ \t]*(.*)$")
            .map_err(|e| Error::invalid_config(format!("cannot build status pattern: {e}")))?;

        Ok(listing
            .lines()
            .filter_map(|text| line.captures(text.trim_end()))
            .filter_map(|caps| {
                Some(StatusEntry {
                    group: caps.get(1)?.as_str().to_string(),
                    process: caps.get(2).map(|m| m.as_str().to_string()),
                    state: ServiceState::from_token(caps.get(3)?.as_str()),
                    detail: caps
                        .get(4)
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    fn listing(&self) -> Result<String> {
        let invocation = self.settings.ctl(["status"]);
        let output = self.runner.run(&invocation)?;
        match output.exit_code {
            Some(code) if self.settings.status_ok_codes.contains(&code) => Ok(output.stdout),
            code => Err(status_failure(&invocation, code, &output.stderr)),
        }
    }
}

fn status_failure(invocation: &Invocation, code: Option<i32>, stderr: &str) -> Error {
    let status = code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
    let stderr = stderr.trim();
    let reason = if stderr.is_empty() {
        format!("exited with {status}")
    } else {
        format!("exited with {status}: {stderr}")
    };
    Error::invocation_failed(invocation.to_string(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};

    const LISTING: &str = "\
api                              RUNNING   pid 4120, uptime 2:01:10
queue:queue_00                   STARTING
queue:queue_01                   RUNNING   pid 4188, uptime 0:00:03
web                              STOPPED   Oct 18 09:12 AM
webhooks                         FATAL     Exited too quickly (process log may have details)
";

    fn probe(output: CommandOutput, name: &str) -> Result<ServiceState> {
        let runner = ScriptedRunner::with_responses(vec![Ok(output)]);
        let settings = SupervisorSettings::default();
        StatusProber::new(&runner, &settings).current_state(name)
    }

    #[test]
    fn test_matches_bare_name() -> Result<()> {
        assert_eq!(probe(CommandOutput::ok(LISTING), "web")?, ServiceState::Stopped);
        assert_eq!(probe(CommandOutput::ok(LISTING), "api")?, ServiceState::Running);
        Ok(())
    }

    #[test]
    fn test_name_prefix_does_not_match_longer_name() -> Result<()> {
        let listing = "webhooks   FATAL   Exited too quickly\n";
        assert_eq!(
            probe(CommandOutput::ok(listing), "web")?,
            ServiceState::Unavailable
        );
        Ok(())
    }

    #[test]
    fn test_matches_first_process_of_group() -> Result<()> {
        assert_eq!(
            probe(CommandOutput::ok(LISTING), "queue")?,
            ServiceState::Starting
        );
        Ok(())
    }

    #[test]
    fn test_unknown_service_is_unavailable() -> Result<()> {
        assert_eq!(
            probe(CommandOutput::ok(LISTING), "mailer")?,
            ServiceState::Unavailable
        );
        assert_eq!(
            probe(CommandOutput::ok(""), "mailer")?,
            ServiceState::Unavailable
        );
        Ok(())
    }

    #[test]
    fn test_not_running_exit_code_is_still_a_listing() -> Result<()> {
        let output = CommandOutput::exited(3, LISTING, "");
        assert_eq!(probe(output, "webhooks")?, ServiceState::Fatal);
        Ok(())
    }

    #[test]
    fn test_unreachable_supervisor_is_an_error() {
        let output = CommandOutput::exited(
            2,
            "",
            "unix:///var/run/supervisor.sock no such file",
        );
        let result = probe(output, "web");
        assert!(matches!(result, Err(Error::InvocationFailed { .. })));
        if let Err(err) = result {
            assert!(err.to_string().contains("no such file"));
        }
    }

    #[test]
    fn test_runner_failure_propagates() {
        let runner = ScriptedRunner::with_responses(vec![Err(Error::invocation_failed(
            "supervisorctl status",
            "No such file or directory",
        ))]);
        let settings = SupervisorSettings::default();
        let result = StatusProber::new(&runner, &settings).current_state("web");
        assert!(matches!(result, Err(Error::InvocationFailed { .. })));
    }

    #[test]
    fn test_status_command_takes_no_service_argument() -> Result<()> {
        let runner = ScriptedRunner::with_responses(vec![Ok(CommandOutput::ok(LISTING))]);
        let settings = SupervisorSettings::default();
        StatusProber::new(&runner, &settings).current_state("web")?;
        assert_eq!(runner.command_lines(), vec!["supervisorctl status"]);
        Ok(())
    }

    #[test]
    fn test_list_parses_every_line() -> Result<()> {
        let runner = ScriptedRunner::with_responses(vec![Ok(CommandOutput::ok(LISTING))]);
        let settings = SupervisorSettings::default();
        let entries = StatusProber::new(&runner, &settings).list()?;

        assert_eq!(entries.len(), 5);
        let queue = entries.get(1);
        assert_eq!(queue.map(|e| e.group.as_str()), Some("queue"));
        assert_eq!(
            queue.and_then(|e| e.process.as_deref()),
            Some("queue_00")
        );
        assert_eq!(queue.map(|e| e.detail.as_str()), Some(""));
        let api = entries.first();
        assert_eq!(api.map(|e| e.state), Some(ServiceState::Running));
        assert_eq!(
            api.map(|e| e.detail.as_str()),
            Some("pid 4120, uptime 2:01:10")
        );
        Ok(())
    }
}
