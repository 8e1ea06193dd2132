//! End-to-end convergence scenarios against a scripted supervisor.

use overseer_core::{
    config::SupervisorSettings,
    runner::{CommandOutput, ScriptedRunner},
    ConvergenceEngine, Error, Outcome, PollPolicy, Result, ServiceSpec, ServiceState,
};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn listing(lines: &[&str]) -> Result<CommandOutput> {
    let mut text = lines.join("\n");
    text.push('\n');
    Ok(CommandOutput::exited(3, text, ""))
}

fn poll(max_tries: u32) -> PollPolicy {
    PollPolicy {
        max_tries,
        interval: Duration::ZERO,
    }
}

fn web() -> ServiceSpec {
    ServiceSpec::new("web", "/usr/bin/web")
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_unknown_services_are_unavailable() -> Result<()> {
    let engine = ConvergenceEngine::new(
        ScriptedRunner::with_responses(vec![
            listing(&["api   RUNNING   pid 10, uptime 1:00:00"]),
            Ok(CommandOutput::ok("")),
        ]),
        SupervisorSettings::default(),
        poll(20),
    );
    assert_eq!(engine.current_state("web")?, ServiceState::Unavailable);
    assert_eq!(engine.current_state("web")?, ServiceState::Unavailable);
    Ok(())
}

#[test]
fn test_start_of_unconfigured_web_fails_without_control_commands() {
    let engine = ConvergenceEngine::new(
        ScriptedRunner::with_responses(vec![listing(&["api   RUNNING"])]),
        SupervisorSettings::default(),
        poll(20),
    );

    let result = engine.start(&web());
    let message = result.as_ref().map_err(ToString::to_string);
    assert!(matches!(result, Err(Error::NotFound { .. })));
    assert!(
        matches!(message, Err(m) if m.contains("cannot be started because it does not exist"))
    );
    assert_eq!(
        engine.runner().command_lines(),
        vec!["supervisorctl status"]
    );
}

#[test]
fn test_enable_then_start_issues_single_start() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = SupervisorSettings {
        config_dir: dir.path().to_path_buf(),
        ..SupervisorSettings::default()
    };
    let engine = ConvergenceEngine::new(ScriptedRunner::new(), settings, poll(20));

    // update succeeds with empty output
    assert_eq!(engine.enable(&web())?, Outcome::Changed);

    engine
        .runner()
        .push(listing(&["web   STOPPED   Oct 18 09:12 AM"]));
    engine.runner().push(Ok(CommandOutput::ok("web: started\n")));
    assert_eq!(engine.start(&web())?, Outcome::Changed);

    assert_eq!(
        engine.runner().command_lines(),
        vec![
            "supervisorctl update",
            "supervisorctl status",
            "supervisorctl start web",
        ]
    );
    Ok(())
}

#[test]
fn test_stop_then_start_waits_through_starting() -> Result<()> {
    let engine = ConvergenceEngine::new(
        ScriptedRunner::with_responses(vec![
            listing(&["web   RUNNING"]),
            Ok(CommandOutput::ok("web: stopped\n")),
            listing(&["web   STARTING"]),
            listing(&["web   STARTING"]),
            listing(&["web   RUNNING   pid 7, uptime 0:00:01"]),
        ]),
        SupervisorSettings::default(),
        poll(20),
    );

    assert_eq!(engine.stop(&web())?, Outcome::Changed);
    assert_eq!(engine.start(&web())?, Outcome::Unchanged);
    assert_eq!(engine.runner().count_verb("start"), 0);
    Ok(())
}

#[test]
fn test_stuck_starting_times_out_after_exactly_max_tries() {
    let max_tries = 5;
    let runner = ScriptedRunner::new();
    for _ in 0..10 {
        runner.push(listing(&["web   STARTING"]));
    }
    let engine = ConvergenceEngine::new(runner, SupervisorSettings::default(), poll(max_tries));

    let result = engine.start(&web());
    assert!(matches!(
        result,
        Err(Error::StateTimeout { tries, .. }) if tries == max_tries
    ));
    // The deciding observation plus max_tries poll observations.
    assert_eq!(engine.runner().count_verb("status"), 6);
}

#[test]
fn test_enable_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = SupervisorSettings {
        config_dir: dir.path().to_path_buf(),
        ..SupervisorSettings::default()
    };
    let engine = ConvergenceEngine::new(ScriptedRunner::new(), settings, poll(20));

    engine.enable(&web())?;
    assert_eq!(engine.runner().count_verb("update"), 1);
    engine.enable(&web())?;
    assert_eq!(engine.runner().count_verb("update"), 1);
    Ok(())
}

#[test]
fn test_disable_of_unavailable_service_is_silent() -> Result<()> {
    let engine = ConvergenceEngine::new(
        ScriptedRunner::with_responses(vec![listing(&["api   RUNNING"])]),
        SupervisorSettings::default(),
        poll(20),
    );
    assert_eq!(engine.disable(&web())?, Outcome::Unchanged);
    assert_eq!(engine.runner().command_lines(), vec!["supervisorctl status"]);
    Ok(())
}

#[test]
fn test_group_suffix_follows_process_name_template() -> Result<()> {
    let grouped = ServiceSpec {
        process_name: "%(program_name)s_%(process_num)02d".to_string(),
        numprocs: 3,
        ..ServiceSpec::new("queue", "/usr/bin/queue")
    };

    let engine = ConvergenceEngine::new(
        ScriptedRunner::with_responses(vec![
            listing(&["queue:queue_00   RUNNING", "queue:queue_01   RUNNING"]),
            Ok(CommandOutput::ok("")),
            listing(&["web   RUNNING"]),
            Ok(CommandOutput::ok("")),
        ]),
        SupervisorSettings::default(),
        poll(20),
    );

    engine.restart(&grouped)?;
    engine.restart(&web())?;

    let lines = engine.runner().command_lines();
    assert!(lines.contains(&"supervisorctl restart queue:*".to_string()));
    assert!(lines.contains(&"supervisorctl restart web".to_string()));
    Ok(())
}
