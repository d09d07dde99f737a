use std::path::PathBuf;

/// Errors raised by agents while acting or learning.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{agent}: numeric divergence in {quantity} (value {value})")]
    NumericDivergence {
        agent: &'static str,
        quantity: &'static str,
        value: f64,
    },

    #[error("environment reports no allowed actions for state {state}")]
    NoAllowedActions { state: usize },

    #[error("{agent} expects {expected} observations")]
    UnsupportedObservation {
        agent: &'static str,
        expected: &'static str,
    },

    #[error("{agent} produced a continuous action for a discrete environment")]
    ContinuousAction { agent: &'static str },

    #[error("saved state belongs to '{found}', expected '{expected}'")]
    StateMismatch { expected: String, found: String },

    #[error("agent state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Return `NumericDivergence` unless `value` is finite.
    pub(crate) fn check_finite(
        agent: &'static str,
        quantity: &'static str,
        value: f64,
    ) -> Result<(), AgentError> {
        if value.is_finite() {
            Ok(())
        } else {
            tracing::warn!(agent, quantity, value, "numeric divergence detected");
            Err(AgentError::NumericDivergence {
                agent,
                quantity,
                value,
            })
        }
    }
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("no 'latest' symlink found in {0}")]
    NoLatestSymlink(PathBuf),

    #[error("failed to read metadata from {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("agent state unavailable: {0}")]
    Agent(#[from] AgentError),
}

/// Errors returned by the command session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no agent initialized; send Init first")]
    NotInitialized,

    #[error("session has been stopped")]
    Stopped,

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::NoLatestSymlink(PathBuf::from("checkpoints"));
        assert_eq!(err.to_string(), "no 'latest' symlink found in checkpoints");
    }

    #[test]
    fn test_divergence_display() {
        let err = AgentError::NumericDivergence {
            agent: "DQN",
            quantity: "td error",
            value: f64::NAN,
        };
        assert_eq!(err.to_string(), "DQN: numeric divergence in td error (value NaN)");
    }

    #[test]
    fn test_check_finite() {
        assert!(AgentError::check_finite("TD", "q value", 1.0).is_ok());
        let err = AgentError::check_finite("TD", "q value", f64::INFINITY).unwrap_err();
        assert!(matches!(err, AgentError::NumericDivergence { agent: "TD", .. }));
    }

    #[test]
    fn test_session_error_wraps_agent_error() {
        let err: SessionError = AgentError::NoAllowedActions { state: 3 }.into();
        assert_eq!(
            err.to_string(),
            "agent error: environment reports no allowed actions for state 3"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("td.alpha must be > 0".to_string());
        assert_eq!(err.to_string(), "config validation error: td.alpha must be > 0");
    }
}
