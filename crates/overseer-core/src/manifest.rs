//! Desired-state manifest: which services exist and what to do with them.
//!
//! ```toml
//! [services.web]
//! command = "/usr/bin/web --port 8080"
//! user = "www-data"
//!
//! [services.web.environment]
//! RUST_LOG = "info"
//!
//! [services.queue]
//! command = "/usr/bin/queue"
//! process_name = "%(program_name)s_%(process_num)02d"
//! numprocs = 4
//!
//! [actions]
//! web = ["enable", "start"]
//! ```
//!
//! Services without an `[actions]` entry are enabled.

use std::{collections::BTreeMap, path::Path};

use serde::Deserialize;

use crate::{engine::Action, spec::ServiceSpec, Error, Result};

const DEFAULT_ACTIONS: [Action; 1] = [Action::Enable];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    actions: BTreeMap<String, Vec<Action>>,
}

/// A parsed and validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    services: BTreeMap<String, ServiceSpec>,
    actions: BTreeMap<String, Vec<Action>>,
}

impl Manifest {
    /// Read and validate the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ParseFailed` if the file cannot be read or parsed, and
    /// `InvalidSpec` if any service fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::parse_failed(path, format!("cannot read: {e}")))?;
        Self::parse(&text, path)
    }

    /// Parse manifest text; `origin` names the source in errors.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::load`].
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let raw: RawManifest =
            toml::from_str(text).map_err(|e| Error::parse_failed(origin, e.to_string()))?;

        let services = raw
            .services
            .into_iter()
            .map(|(key, spec)| named(key, spec))
            .collect::<Result<BTreeMap<_, _>>>()?;

        if let Some(orphan) = raw.actions.keys().find(|name| !services.contains_key(*name)) {
            return Err(Error::parse_failed(
                origin,
                format!("actions given for undeclared service '{orphan}'"),
            ));
        }

        Ok(Self {
            services,
            actions: raw.actions,
        })
    }

    /// Declared services in name order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.values()
    }

    /// Specification for `name`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` if the manifest does not declare `name`.
    pub fn service(&self, name: &str) -> Result<&ServiceSpec> {
        self.services
            .get(name)
            .ok_or_else(|| Error::invalid_spec(name, "not declared in the manifest"))
    }

    /// Actions to run for `name`, in order.
    #[must_use]
    pub fn actions_for(&self, name: &str) -> &[Action] {
        self.actions
            .get(name)
            .map_or(DEFAULT_ACTIONS.as_slice(), Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Fill the service name from the table key and validate.
fn named(key: String, mut spec: ServiceSpec) -> Result<(String, ServiceSpec)> {
    if spec.service_name.is_empty() {
        spec.service_name.clone_from(&key);
    } else if spec.service_name != key {
        return Err(Error::invalid_spec(
            key,
            format!("service_name '{}' does not match its table", spec.service_name),
        ));
    }
    let spec = spec.validated()?;
    Ok((key, spec))
}
