use thiserror::Error;

/// KNI network runtime error types
#[derive(Error, Debug)]
pub enum KniError {
    /// Request rejected before any side effect (bad annotation, missing field)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Plugin runtime failed to set up, tear down or report status
    #[error("Plugin error for {sandbox_id}: {message}")]
    Plugin { sandbox_id: String, message: String },

    /// Attachment store unavailable or corrupt
    #[error("Store error: {0}")]
    Store(String),

    /// No attachment record for the sandbox
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation reserved but not provided by this runtime
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Request deadline expired before the plugin returned
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Configuration error (plugin configuration or service settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl KniError {
    /// Build a plugin error tagged with the sandbox it was raised for.
    pub fn plugin(sandbox_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        KniError::Plugin {
            sandbox_id: sandbox_id.into(),
            message: message.to_string(),
        }
    }

    /// True for the "nothing to do" class, as opposed to "something broke".
    pub fn is_not_found(&self) -> bool {
        matches!(self, KniError::NotFound(_))
    }
}

impl From<serde_json::Error> for KniError {
    fn from(err: serde_json::Error) -> Self {
        KniError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for KniError {
    fn from(err: serde_yaml::Error) -> Self {
        KniError::Serialization(err.to_string())
    }
}

/// Result type alias for KNI operations
pub type Result<T> = std::result::Result<T, KniError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = KniError::Validation("sandbox id is required".to_string());
        assert_eq!(error.to_string(), "Validation error: sandbox id is required");
    }

    #[test]
    fn test_plugin_error_display() {
        let error = KniError::plugin("sb-1", "bridge: failed to create veth");
        assert_eq!(
            error.to_string(),
            "Plugin error for sb-1: bridge: failed to create veth"
        );
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        assert!(KniError::NotFound("sb-1".to_string()).is_not_found());
        assert!(!KniError::Store("disk full".to_string()).is_not_found());
    }

    #[test]
    fn test_not_implemented_display() {
        let error = KniError::NotImplemented("SetupNodeNetwork".to_string());
        assert_eq!(error.to_string(), "Not implemented: SetupNodeNetwork");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KniError = io_error.into();
        assert!(matches!(err, KniError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: KniError = result.unwrap_err().into();
        assert!(matches!(err, KniError::Serialization(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let err: KniError = result.unwrap_err().into();
        assert!(matches!(err, KniError::Serialization(_)));
    }
}
