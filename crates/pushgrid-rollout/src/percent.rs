//! Rollout percentages.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RolloutError {
    #[error("rollout value must be an integer between 1 and 100, got {0:?}")]
    OutOfRange(String),

    #[error("cannot update rollout value for a completed rollout release")]
    Completed,

    #[error("rollout value must be greater than {current}, the existing value")]
    NotIncreasing { current: u8 },
}

/// A rollout percentage in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RolloutPercent(u8);

impl RolloutPercent {
    pub const FULL: RolloutPercent = RolloutPercent(100);

    pub fn new(value: u8) -> Result<Self, RolloutError> {
        if (1..=100).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RolloutError::OutOfRange(value.to_string()))
        }
    }

    /// Parse the textual form used in query strings. Leading zeros, signs
    /// and fractions are rejected.
    pub fn parse(input: &str) -> Result<Self, RolloutError> {
        let out_of_range = || RolloutError::OutOfRange(input.to_string());
        if input.is_empty() || input.starts_with('0') || !input.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(out_of_range());
        }
        input
            .parse::<u8>()
            .map_err(|_| out_of_range())
            .and_then(Self::new)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_full(self) -> bool {
        self == Self::FULL
    }

    /// The stored form: a full rollout is recorded as no rollout at all.
    pub fn stored(self) -> Option<u8> {
        (!self.is_full()).then_some(self.0)
    }

    /// Validate raising an existing release's rollout to `self` and return
    /// the value to store. Rollouts only move up, and only while unfinished.
    pub fn apply_to(self, current: Option<u8>) -> Result<Option<u8>, RolloutError> {
        match current {
            Some(current) if current != 100 => {
                if current >= self.0 {
                    Err(RolloutError::NotIncreasing { current })
                } else {
                    Ok(self.stored())
                }
            }
            _ => Err(RolloutError::Completed),
        }
    }
}

impl TryFrom<u8> for RolloutPercent {
    type Error = RolloutError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RolloutPercent> for u8 {
    fn from(value: RolloutPercent) -> Self {
        value.0
    }
}

impl fmt::Display for RolloutPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
