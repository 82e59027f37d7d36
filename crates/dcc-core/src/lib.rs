//! Domain model shared by the daily-challenge crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "dcc-core";

/// Difficulty tier assigned by the external judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// The judge's numeric level encoding (1/2/3). Levels outside that
    /// range are not a difficulty we know about.
    pub fn from_level(level: i16) -> Option<Self> {
        match level {
            1 => Some(Self::Easy),
            2 => Some(Self::Medium),
            3 => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn level(self) -> i16 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }

    /// Reward for completing a problem of this tier.
    pub fn points(self) -> i64 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        };
        f.write_str(name)
    }
}

/// Rule a channel uses to select the next problem once its queue is
/// exhausted. Only `Any` and `None` are wired up; the tier-filtered
/// policies are reserved and error at pick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickPolicy {
    Any,
    Easy,
    Medium,
    Hard,
    None,
}

impl PickPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::None => "none",
        }
    }

    pub const ALL: [PickPolicy; 5] = [
        Self::Any,
        Self::Easy,
        Self::Medium,
        Self::Hard,
        Self::None,
    ];
}

impl fmt::Display for PickPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized picking policy {0:?}")]
pub struct InvalidPolicy(pub String);

impl FromStr for PickPolicy {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            "none" => Ok(Self::None),
            other => Err(InvalidPolicy(other.to_string())),
        }
    }
}

/// One problem as reported by the judge's catalog endpoint. Paid-only
/// entries are carried so the refresh step can exclude them from the
/// selection universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProblem {
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub total_accepted: i64,
    pub total_submitted: i64,
    pub paid_only: bool,
}

/// The scheduler's answer to "what is this channel's problem today":
/// the catalog row joined with its queue position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyProblem {
    pub slug: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub position: i64,
}

/// Result of a completion claim. `AlreadyRewarded` means the member's
/// completion mark for this channel already names the claimed slug, so
/// no points moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    Rewarded { total: i64 },
    AlreadyRewarded,
}
