//! Relay status values published on the status side-channel.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Externally observable relay state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayStatus {
    /// An agent process is running.
    Working,
    /// Waiting for notifications.
    Sleeping,
    /// Recovering from a crash or hang.
    Crashed,
    /// Backing off after an API rate limit.
    RateLimited,
    /// The run is over.
    Off,
}

impl RelayStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Sleeping => "sleeping",
            Self::Crashed => "crashed",
            Self::RateLimited => "rate_limited",
            Self::Off => "off",
        }
    }
}

impl Display for RelayStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
