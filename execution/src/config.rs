use crate::error::ErrorPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 8;
pub const DEFAULT_MAX_EVENTS_PER_CALL: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    InvalidNonZero { field: &'static str },
}

/// Limits and error policy applied by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum nesting of calls, counting the outermost call.
    pub max_call_depth: usize,
    /// Maximum number of events a single transaction (or genesis step) may emit.
    pub max_events_per_call: usize,
    pub policy: ErrorPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_events_per_call: DEFAULT_MAX_EVENTS_PER_CALL,
            policy: ErrorPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "max_call_depth",
            });
        }
        if self.max_events_per_call == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "max_events_per_call",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"max_call_depth": 2}"#).expect("config");
        assert_eq!(config.max_call_depth, 2);
        assert_eq!(config.max_events_per_call, DEFAULT_MAX_EVENTS_PER_CALL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = RuntimeConfig {
            max_events_per_call: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "max_events_per_call"
            })
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<RuntimeConfig>(r#"{"max_depth": 2}"#).is_err());
    }
}
