//! Error types for capagent
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Unknown endpoint or decision id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Endpoint id already registered
    #[error("Duplicate endpoint id: {0}")]
    DuplicateId(String),

    /// Routing filter produced no candidates
    #[error("No available endpoint for capability '{capability}'")]
    NoAvailableEndpoint { capability: String },

    /// Heartbeat send or discovery scan exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Network or connection failure, or a non-success controller reply
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration (weights, thresholds)
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML manifest/config parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl AgentError {
    /// Whether a fresh attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Timeout(_) | AgentError::Transport(_))
    }
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = AgentError::NotFound("ocr-1".to_string());
        assert_eq!(err.to_string(), "Not found: ocr-1");
    }

    #[test]
    fn test_duplicate_id_error() {
        let err = AgentError::DuplicateId("ocr-1".to_string());
        assert_eq!(err.to_string(), "Duplicate endpoint id: ocr-1");
    }

    #[test]
    fn test_no_available_endpoint_error() {
        let err = AgentError::NoAvailableEndpoint {
            capability: "ocr".to_string(),
        };
        assert_eq!(err.to_string(), "No available endpoint for capability 'ocr'");
    }

    #[test]
    fn test_config_error() {
        let err = AgentError::Config("routing weights sum to 0.9".to_string());
        assert_eq!(err.to_string(), "Config error: routing weights sum to 0.9");
    }

    #[test]
    fn test_is_retryable() {
        assert!(AgentError::Timeout("heartbeat".into()).is_retryable());
        assert!(AgentError::Transport("connection refused".into()).is_retryable());
        assert!(!AgentError::NotFound("x".into()).is_retryable());
        assert!(!AgentError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AgentError = io_err.into();
        assert!(matches!(err, AgentError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: AgentError = json_err.into();
        assert!(matches!(err, AgentError::Json(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("key: [unclosed").unwrap_err();
        let err: AgentError = yaml_err.into();
        assert!(matches!(err, AgentError::Yaml(_)));
    }
}
