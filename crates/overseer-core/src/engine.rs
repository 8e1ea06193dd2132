//! Convergence engine: drives one service toward a requested lifecycle action.
//!
//! The engine holds no state between calls. Every decision starts from a fresh
//! status query, and the only waiting it does is the bounded poll loop used
//! when the supervisor is already mid-transition toward the requested state.
//!
//! # Operations
//!
//! | action    | UNAVAILABLE      | already there | in transition      | otherwise        |
//! |-----------|------------------|---------------|--------------------|------------------|
//! | `start`   | not found        | no-op         | poll for RUNNING   | `start <target>` |
//! | `stop`    | not found        | no-op         | poll for STOPPED   | `stop <target>`  |
//! | `restart` | not found        |               |                    | `restart <target>` |
//! | `disable` | no-op            |               |                    | remove + update  |
//!
//! `enable` ignores the observed state: it writes the rendered configuration
//! and runs `update` only when the file content changed.

use std::{thread, time::Duration};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info, warn};

use crate::{
    config::{Config, PollSettings, SupervisorSettings},
    control::{ControlAction, ControlInvoker},
    prober::{StatusEntry, StatusProber},
    runner::CommandRunner,
    spec::ServiceSpec,
    state::ServiceState,
    sync::ConfigSynchronizer,
    Error, Result,
};

/// Lifecycle action requested for a service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Enable,
    Disable,
    Start,
    Stop,
    Restart,
}

/// Whether an operation touched the supervisor or its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Changed,
    Unchanged,
}

/// Attempt budget for waiting out a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Number of status observations before giving up.
    pub max_tries: u32,
    /// Pause between consecutive observations.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for PollPolicy {
    fn from(settings: &PollSettings) -> Self {
        Self {
            max_tries: settings.max_tries,
            interval: settings.interval(),
        }
    }
}

/// Reconciles individual services against a supervisor.
pub struct ConvergenceEngine<R: CommandRunner> {
    runner: R,
    settings: SupervisorSettings,
    sync: ConfigSynchronizer,
    poll: PollPolicy,
}

impl<R: CommandRunner> ConvergenceEngine<R> {
    /// Create an engine from supervisor settings and a poll policy.
    pub fn new(runner: R, settings: SupervisorSettings, poll: PollPolicy) -> Self {
        let sync = ConfigSynchronizer::new(settings.config_dir.clone(), settings.file_mode);
        Self {
            runner,
            settings,
            sync,
            poll,
        }
    }

    /// Create an engine from a loaded configuration.
    pub fn from_config(runner: R, config: &Config) -> Self {
        Self::new(
            runner,
            config.supervisor.clone(),
            PollPolicy::from(&config.poll),
        )
    }

    /// The runner commands are issued through.
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    /// Run `action` for `spec`.
    ///
    /// # Errors
    ///
    /// See the individual operations.
    pub fn converge(&self, action: Action, spec: &ServiceSpec) -> Result<Outcome> {
        match action {
            Action::Enable => self.enable(spec),
            Action::Disable => self.disable(spec),
            Action::Start => self.start(spec),
            Action::Stop => self.stop(spec),
            Action::Restart => self.restart(spec),
        }
    }

    /// Write the service's configuration and apply it if it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the specification is invalid, the file cannot be
    /// written, or `update` fails.
    pub fn enable(&self, spec: &ServiceSpec) -> Result<Outcome> {
        spec.validate()?;
        if !self.sync.write(spec)? {
            debug!(service = %spec.service_name, "configuration already current");
            return Ok(Outcome::Unchanged);
        }
        info!(service = %spec.service_name, "enabling");
        self.update(spec)?;
        Ok(Outcome::Changed)
    }

    /// Remove the service's configuration and apply the removal.
    ///
    /// # Errors
    ///
    /// Returns an error if the status query fails, the file cannot be removed,
    /// or `update` fails.
    pub fn disable(&self, spec: &ServiceSpec) -> Result<Outcome> {
        let name = &spec.service_name;
        if self.current_state(name)? == ServiceState::Unavailable {
            debug!(service = %name, "already disabled");
            return Ok(Outcome::Unchanged);
        }

        info!(service = %name, "disabling");
        if !self.sync.remove(name)? {
            warn!(
                service = %name,
                path = %self.sync.conf_path(name).display(),
                "service is loaded but has no configuration file here"
            );
            return Ok(Outcome::Unchanged);
        }
        self.update(spec)?;
        Ok(Outcome::Changed)
    }

    /// Bring the service to RUNNING.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the supervisor does not know the service
    /// - `StateTimeout` if it stays STARTING past the poll budget
    /// - `ControlCommandFailed` if `start` fails
    pub fn start(&self, spec: &ServiceSpec) -> Result<Outcome> {
        let name = &spec.service_name;
        match self.current_state(name)? {
            ServiceState::Unavailable => Err(Error::not_found(name.as_str(), "started")),
            ServiceState::Running => {
                debug!(service = %name, "already started");
                Ok(Outcome::Unchanged)
            }
            ServiceState::Starting => {
                debug!(service = %name, "already starting");
                self.wait_for_state(name, ServiceState::Running)?;
                Ok(Outcome::Unchanged)
            }
            _ => {
                info!(service = %name, "starting");
                self.control(ControlAction::Start, spec, "started")?;
                Ok(Outcome::Changed)
            }
        }
    }

    /// Bring the service to STOPPED.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the supervisor does not know the service
    /// - `StateTimeout` if it stays STOPPING past the poll budget
    /// - `ControlCommandFailed` if `stop` fails
    pub fn stop(&self, spec: &ServiceSpec) -> Result<Outcome> {
        let name = &spec.service_name;
        match self.current_state(name)? {
            ServiceState::Unavailable => Err(Error::not_found(name.as_str(), "stopped")),
            ServiceState::Stopped => {
                debug!(service = %name, "already stopped");
                Ok(Outcome::Unchanged)
            }
            ServiceState::Stopping => {
                debug!(service = %name, "already stopping");
                self.wait_for_state(name, ServiceState::Stopped)?;
                Ok(Outcome::Unchanged)
            }
            _ => {
                info!(service = %name, "stopping");
                self.control(ControlAction::Stop, spec, "stopped")?;
                Ok(Outcome::Changed)
            }
        }
    }

    /// Restart the service whatever state it is in.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the supervisor does not know the service
    /// - `ControlCommandFailed` if `restart` fails
    pub fn restart(&self, spec: &ServiceSpec) -> Result<Outcome> {
        let name = &spec.service_name;
        if self.current_state(name)? == ServiceState::Unavailable {
            return Err(Error::not_found(name.as_str(), "restarted"));
        }
        info!(service = %name, "restarting");
        self.control(ControlAction::Restart, spec, "started")?;
        Ok(Outcome::Changed)
    }

    /// Observed state of `service_name`.
    ///
    /// # Errors
    ///
    /// Returns an invocation error if the status command fails.
    pub fn current_state(&self, service_name: &str) -> Result<ServiceState> {
        StatusProber::new(&self.runner, &self.settings).current_state(service_name)
    }

    /// Every service in the supervisor's status listing.
    ///
    /// # Errors
    ///
    /// Returns an invocation error if the status command fails.
    pub fn list(&self) -> Result<Vec<StatusEntry>> {
        StatusProber::new(&self.runner, &self.settings).list()
    }

    /// Poll until `service_name` reports `target`.
    ///
    /// Makes at most `max_tries` observations, pausing `interval` between
    /// them but not after the last.
    fn wait_for_state(&self, service_name: &str, target: ServiceState) -> Result<()> {
        for attempt in 1..=self.poll.max_tries {
            let state = self.current_state(service_name)?;
            if state == target {
                return Ok(());
            }
            debug!(
                service = service_name,
                %state,
                %target,
                attempt,
                max_tries = self.poll.max_tries,
                "waiting for state"
            );
            if attempt < self.poll.max_tries {
                thread::sleep(self.poll.interval);
            }
        }
        Err(Error::state_timeout(
            service_name,
            target.to_string(),
            self.poll.max_tries,
        ))
    }

    fn control(
        &self,
        action: ControlAction,
        spec: &ServiceSpec,
        verb: &'static str,
    ) -> Result<()> {
        let outcome = ControlInvoker::new(&self.runner, &self.settings).invoke(action, spec)?;
        if outcome.success {
            Ok(())
        } else {
            Err(Error::control_failed(
                spec.service_name.as_str(),
                verb,
                outcome.detail,
            ))
        }
    }

    fn update(&self, spec: &ServiceSpec) -> Result<()> {
        self.control(ControlAction::Update, spec, "updated")
    }
}
