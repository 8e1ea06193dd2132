//! Control invoker: issues start/stop/restart/update against the supervisor.

use strum::{AsRefStr, Display};
use tracing::{info, warn};

use crate::{
    config::SupervisorSettings,
    runner::{CommandOutput, CommandRunner},
    spec::ServiceSpec,
    Result,
};

/// Whether `text` carries a supervisorctl failure line.
///
/// Failed verbs print `<name>: ERROR (<reason>)`; failures not tied to a
/// process print a line starting with `ERROR (` or `ERROR:`. A process name
/// that merely contains the word does not count.
fn has_error_marker(text: &str) -> bool {
    text.lines().map(str::trim_start).any(|line| {
        line.starts_with("ERROR (") || line.starts_with("ERROR:") || line.contains(": ERROR (")
    })
}

/// Control verb understood by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    /// Re-read configuration files and apply added/changed/removed groups.
    Update,
}

/// Result of one control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutcome {
    pub success: bool,
    /// Trimmed command output, for error messages.
    pub detail: String,
}

impl ControlOutcome {
    fn from_output(output: &CommandOutput) -> Self {
        let success = output.success()
            && !has_error_marker(&output.stdout)
            && !has_error_marker(&output.stderr);
        let detail = [output.stdout.trim(), output.stderr.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        let detail = match (detail.is_empty(), output.exit_code) {
            (false, _) => detail,
            (true, Some(code)) => format!("exited with status {code}"),
            (true, None) => "terminated by a signal".to_string(),
        };
        Self { success, detail }
    }
}

/// Issues control commands for one supervisor.
pub struct ControlInvoker<'a, R: CommandRunner> {
    runner: &'a R,
    settings: &'a SupervisorSettings,
}

impl<'a, R: CommandRunner> ControlInvoker<'a, R> {
    #[must_use]
    pub const fn new(runner: &'a R, settings: &'a SupervisorSettings) -> Self {
        Self { runner, settings }
    }

    /// Issue `action` for `spec`.
    ///
    /// Start, stop and restart address the service by [`ServiceSpec::target`].
    /// `update` takes no service argument and runs as the administrative
    /// identity. The command succeeded when it exits 0 and prints no
    /// supervisorctl `ERROR` line.
    ///
    /// # Errors
    ///
    /// Returns an invocation error only if the command could not be run; a
    /// command that ran and failed yields `success == false`.
    pub fn invoke(&self, action: ControlAction, spec: &ServiceSpec) -> Result<ControlOutcome> {
        let invocation = match action {
            ControlAction::Update => self
                .settings
                .ctl([action.as_ref()])
                .as_user(self.settings.admin_user.clone()),
            ControlAction::Start | ControlAction::Stop | ControlAction::Restart => {
                self.settings.ctl([action.as_ref().to_string(), spec.target()])
            }
        };

        info!(service = %spec.service_name, command = %invocation, "issuing control command");
        let output = self.runner.run(&invocation)?;
        let outcome = ControlOutcome::from_output(&output);
        if !outcome.success {
            warn!(
                service = %spec.service_name,
                %action,
                detail = %outcome.detail,
                "control command reported failure"
            );
        }
        Ok(outcome)
    }
}
