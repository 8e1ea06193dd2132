//! CLI command handlers.
//!
//! Handlers write their results to the supplied writer so they can be driven
//! with a scripted supervisor in tests; diagnostics go through `tracing`.

use std::{io::Write, path::Path};

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use overseer_core::{
    load_config, reconcile, reconcile::ServiceReport, render::render, runner::CommandRunner,
    system_runner, Action, ConvergenceEngine, Manifest,
};
use serde_json::json;
use tracing::debug;

use crate::cli::{Cli, Commands, Target};

/// Execute the parsed command line against the real supervisor.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the command fails.
pub fn execute(cli: &Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    debug!(?config, "configuration loaded");
    let engine = ConvergenceEngine::from_config(system_runner(&config), &config);
    let mut stdout = std::io::stdout().lock();
    run(&cli.command, &engine, &mut stdout)
}

/// Execute one command through `engine`, writing results to `out`.
///
/// # Errors
///
/// Returns an error if the command fails, or, for `apply`, if any service
/// failed to converge.
pub fn run<R: CommandRunner>(
    command: &Commands,
    engine: &ConvergenceEngine<R>,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Commands::Apply {
            manifest,
            services,
            json,
        } => cmd_apply(engine, manifest, services, *json, out),
        Commands::Enable(target) => cmd_lifecycle(engine, Action::Enable, target, out),
        Commands::Disable(target) => cmd_lifecycle(engine, Action::Disable, target, out),
        Commands::Start(target) => cmd_lifecycle(engine, Action::Start, target, out),
        Commands::Stop(target) => cmd_lifecycle(engine, Action::Stop, target, out),
        Commands::Restart(target) => cmd_lifecycle(engine, Action::Restart, target, out),
        Commands::Status { name, json } => cmd_status(engine, name.as_deref(), *json, out),
        Commands::Render { manifest, name } => cmd_render(manifest, name, out),
        Commands::Check { manifest } => cmd_check(manifest, out),
    }
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("Failed to load manifest {}", path.display()))
}

/// Run one lifecycle action for one service.
fn cmd_lifecycle<R: CommandRunner>(
    engine: &ConvergenceEngine<R>,
    action: Action,
    target: &Target,
    out: &mut impl Write,
) -> Result<()> {
    let manifest = load_manifest(&target.manifest)?;
    let spec = manifest.service(&target.name)?;
    let outcome = engine.converge(action, spec)?;
    writeln!(out, "{}: {action} {outcome}", target.name)?;
    Ok(())
}

/// Reconcile a manifest and report per service.
fn cmd_apply<R: CommandRunner>(
    engine: &ConvergenceEngine<R>,
    manifest: &Path,
    only: &[String],
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    let report = reconcile(engine, &manifest, only)?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        for service in &report.services {
            writeln!(out, "{}", describe(service))?;
        }
    }

    let failed = report.failures().count();
    if failed > 0 {
        bail!(
            "{failed} of {} services failed to converge",
            report.services.len()
        );
    }
    Ok(())
}

fn describe(service: &ServiceReport) -> String {
    let steps = service
        .steps
        .iter()
        .map(|step| format!("{} {}", step.action, step.outcome));
    let failure = service
        .failure
        .iter()
        .map(|f| format!("{} FAILED: {}", f.action, f.message));
    let summary = steps.chain(failure).join(", ");
    if summary.is_empty() {
        format!("{}: nothing to do", service.service)
    } else {
        format!("{}: {summary}", service.service)
    }
}

/// Show one service's state, or the whole listing.
fn cmd_status<R: CommandRunner>(
    engine: &ConvergenceEngine<R>,
    name: Option<&str>,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    if let Some(name) = name {
        let state = engine.current_state(name)?;
        if json {
            writeln!(out, "{}", json!({ "service": name, "state": state }))?;
        } else {
            writeln!(out, "{name} {state}")?;
        }
        return Ok(());
    }

    let entries = engine.list()?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
        return Ok(());
    }
    for entry in entries {
        let label = entry
            .process
            .as_ref()
            .map_or_else(|| entry.group.clone(), |p| format!("{}:{p}", entry.group));
        writeln!(out, "{label:<32} {:<10} {}", entry.state, entry.detail)?;
    }
    Ok(())
}

fn cmd_render(manifest: &Path, name: &str, out: &mut impl Write) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    write!(out, "{}", render(manifest.service(name)?))?;
    Ok(())
}

fn cmd_check(manifest: &Path, out: &mut impl Write) -> Result<()> {
    let manifest = load_manifest(manifest)?;
    writeln!(out, "manifest OK: {} services", manifest.len())?;
    for spec in manifest.services() {
        let actions = manifest.actions_for(&spec.service_name).iter().join(", ");
        writeln!(out, "  {} ({actions})", spec.service_name)?;
    }
    Ok(())
}
