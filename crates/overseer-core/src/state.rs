//! Observed service state as reported by the supervisor.

use std::str::FromStr;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

/// State of one service at the moment it was queried.
///
/// `Unavailable` is synthesized locally when the supervisor has no record of
/// the name; every other value is the supervisor's own state token. Values are
/// never cached: each decision re-queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Unavailable,
    Stopped,
    Starting,
    Running,
    Stopping,
    Backoff,
    Fatal,
    Exited,
    Unknown,
}

impl ServiceState {
    /// Map a supervisor state token to a state.
    ///
    /// Tokens outside the supervisor's vocabulary map to `Unknown`.
    /// `UNAVAILABLE` is never accepted from the supervisor since it is only
    /// produced locally.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match Self::from_str(token) {
            Ok(Self::Unavailable) | Err(_) => {
                tracing::debug!(token, "unrecognised supervisor state token");
                Self::Unknown
            }
            Ok(state) => state,
        }
    }
}
