//! Reconcile every service in a manifest, one at a time.

use serde::Serialize;
use tracing::{error, info};

use crate::{
    engine::{Action, ConvergenceEngine, Outcome},
    manifest::Manifest,
    runner::CommandRunner,
    Error, Result,
};

/// One action that completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub action: Action,
    pub outcome: Outcome,
}

/// The action that stopped a service's reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub action: Action,
    pub code: &'static str,
    pub message: String,
}

/// What happened to one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub service: String,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl ServiceReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.steps.iter().any(|step| step.outcome == Outcome::Changed)
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub services: Vec<ServiceReport>,
}

impl Report {
    /// Whether every service converged.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.services.iter().all(|s| s.failure.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services.iter().filter(|s| s.failure.is_some())
    }
}

/// Run each selected service's actions through `engine`.
///
/// Services are processed in name order. Within a service, actions run in
/// declared order and stop at the first failure; the next service is still
/// reconciled. An empty `only` selects every service.
///
/// # Errors
///
/// Returns `InvalidSpec` before doing anything if `only` names a service the
/// manifest does not declare. Per-service failures are recorded in the
/// report instead.
pub fn reconcile<R: CommandRunner>(
    engine: &ConvergenceEngine<R>,
    manifest: &Manifest,
    only: &[String],
) -> Result<Report> {
    for name in only {
        manifest.service(name)?;
    }

    let selected = manifest
        .services()
        .filter(|spec| only.is_empty() || only.contains(&spec.service_name));

    let mut report = Report::default();
    for spec in selected {
        let name = &spec.service_name;
        let mut service = ServiceReport {
            service: name.clone(),
            steps: Vec::new(),
            failure: None,
        };

        for &action in manifest.actions_for(name) {
            match engine.converge(action, spec) {
                Ok(outcome) => {
                    info!(service = %name, %action, %outcome, "converged");
                    service.steps.push(Step { action, outcome });
                }
                Err(err) => {
                    error!(service = %name, %action, error = %err, "convergence failed");
                    service.failure = Some(failure(action, &err));
                    break;
                }
            }
        }
        report.services.push(service);
    }
    Ok(report)
}

fn failure(action: Action, err: &Error) -> Failure {
    Failure {
        action,
        code: err.code(),
        message: err.to_string(),
    }
}
