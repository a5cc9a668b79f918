//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment a config entry or service instance is scoped to.
///
/// `All` matches every environment and is the default scope for service
/// registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    All,
    Dev,
    Test,
    Prod,
}

impl Environment {
    /// All known environments, in overlay-suffix parsing order.
    pub const KNOWN: [Environment; 4] = [
        Environment::All,
        Environment::Dev,
        Environment::Test,
        Environment::Prod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::All => "all",
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }

    /// True when an instance scoped to `self` is visible to a request
    /// scoped to `requested`.
    pub fn matches(&self, requested: Environment) -> bool {
        *self == Environment::All || *self == requested
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "all" => Ok(Environment::All),
            "dev" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" => Ok(Environment::Prod),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Current wall-clock time in unix nanoseconds.
///
/// Used as the monotonically increasing version stamp on config entries.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_roundtrip() {
        for env in Environment::KNOWN {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_matching() {
        assert!(Environment::All.matches(Environment::Prod));
        assert!(Environment::Dev.matches(Environment::Dev));
        assert!(!Environment::Dev.matches(Environment::Prod));
    }

    #[test]
    fn test_environment_serde_lowercase() {
        let json = serde_json::to_string(&Environment::Prod).unwrap();
        assert_eq!(json, "\"prod\"");
        let parsed: Environment = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(parsed, Environment::All);
    }
}
