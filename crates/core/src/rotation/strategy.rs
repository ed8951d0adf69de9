use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

/// Algorithm used to pick the next provider from a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Priority,
    Weighted,
    LeastUsed,
    FastestResponse,
}

impl RotationStrategy {
    pub const ALL: [RotationStrategy; 5] = [
        RotationStrategy::RoundRobin,
        RotationStrategy::Priority,
        RotationStrategy::Weighted,
        RotationStrategy::LeastUsed,
        RotationStrategy::FastestResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStrategy::RoundRobin => "round_robin",
            RotationStrategy::Priority => "priority",
            RotationStrategy::Weighted => "weighted",
            RotationStrategy::LeastUsed => "least_used",
            RotationStrategy::FastestResponse => "fastest_response",
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RotationStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| ConfigurationError::UnknownStrategy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_through_str() {
        for strategy in RotationStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<RotationStrategy>(), Ok(strategy));
        }
        assert_eq!(
            "random".parse::<RotationStrategy>(),
            Err(ConfigurationError::UnknownStrategy("random".to_string()))
        );
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&RotationStrategy::FastestResponse).unwrap();
        assert_eq!(json, "\"fastest_response\"");
    }
}
