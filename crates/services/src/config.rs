use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use progress_core::Curriculum;

/// What `check_access` answers when the store cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradedMode {
    /// Surface `StoreUnavailable` to the caller.
    #[default]
    Strict,
    /// Report every section of the module as unlocked, flagged as degraded.
    UnlockAll,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown degraded mode {0:?}, expected \"strict\" or \"unlock-all\"")]
pub struct UnknownDegradedMode(pub String);

impl FromStr for DegradedMode {
    type Err = UnknownDegradedMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DegradedMode::Strict),
            "unlock-all" | "unlock_all" => Ok(DegradedMode::UnlockAll),
            other => Err(UnknownDegradedMode(other.to_string())),
        }
    }
}

impl fmt::Display for DegradedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DegradedMode::Strict => "strict",
            DegradedMode::UnlockAll => "unlock-all",
        })
    }
}

/// Tracker settings supplied at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerConfig {
    pub degraded_mode: DegradedMode,
    pub curriculum: Curriculum,
}

impl TrackerConfig {
    #[must_use]
    pub fn with_degraded_mode(mut self, mode: DegradedMode) -> Self {
        self.degraded_mode = mode;
        self
    }

    #[must_use]
    pub fn with_curriculum(mut self, curriculum: Curriculum) -> Self {
        self.curriculum = curriculum;
        self
    }
}
