//! Supervisor configuration file rendering.
//!
//! Produces one `[program:<name>]` (or `[eventlistener:<name>]`) section in
//! the supervisor's ini grammar. The output is deterministic for a given
//! specification so the synchronizer can compare it byte for byte.

use std::fmt::Display;

use itertools::Itertools;

use crate::spec::{LogStream, ServiceSpec};

/// Render the configuration file text for `spec`.
#[must_use]
pub fn render(spec: &ServiceSpec) -> String {
    let mut directives: Vec<(String, String)> = vec![
        directive("command", &spec.command),
        directive("process_name", &spec.process_name),
        directive("numprocs", spec.numprocs),
        directive("numprocs_start", spec.numprocs_start),
        directive("priority", spec.priority),
        directive("autostart", spec.autostart),
        directive("autorestart", spec.autorestart.directive()),
        directive("startsecs", spec.startsecs),
        directive("startretries", spec.startretries),
        directive("exitcodes", spec.exitcodes.iter().join(",")),
        directive("stopsignal", spec.stopsignal),
        directive("stopwaitsecs", spec.stopwaitsecs),
    ];

    directives.extend(spec.stopasgroup.map(|v| directive("stopasgroup", v)));
    directives.extend(spec.killasgroup.map(|v| directive("killasgroup", v)));
    directives.extend(spec.user.as_ref().map(|v| directive("user", v)));
    directives.push(directive("redirect_stderr", spec.redirect_stderr));
    directives.extend(log_directives("stdout", &spec.stdout));
    directives.extend(log_directives("stderr", &spec.stderr));

    if !spec.environment.is_empty() {
        let pairs = spec
            .environment
            .iter()
            .map(|(key, value)| format!("{key}=\"{}\"", escape_value(value)))
            .join(",");
        directives.push(directive("environment", pairs));
    }
    directives.extend(spec.directory.as_ref().map(|v| directive("directory", v)));
    directives.extend(spec.umask.as_ref().map(|v| directive("umask", v)));
    directives.push(directive("serverurl", &spec.serverurl));

    if spec.eventlistener {
        directives.extend(
            spec.eventlistener_buffer_size
                .map(|size| directive("buffer_size", size)),
        );
        directives.extend(
            spec.eventlistener_events
                .as_ref()
                .map(|events| directive("events", events.join(","))),
        );
    }

    let body = directives
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .join("");
    format!("[{}:{}]\n{body}", spec.section_kind(), spec.service_name)
}

fn directive(key: &str, value: impl Display) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn log_directives(stream: &str, log: &LogStream) -> [(String, String); 5] {
    [
        directive(&format!("{stream}_logfile"), &log.logfile),
        directive(&format!("{stream}_logfile_maxbytes"), &log.logfile_maxbytes),
        directive(&format!("{stream}_logfile_backups"), log.logfile_backups),
        directive(&format!("{stream}_capture_maxbytes"), &log.capture_maxbytes),
        directive(&format!("{stream}_events_enabled"), log.events_enabled),
    ]
}

/// Quote-safe environment value: `%` is the supervisor's expansion marker.
fn escape_value(value: &str) -> String {
    value.replace('%', "%%").replace('"', "\\\"")
}
