use thiserror::Error;

/// Unified error type for Tether
///
/// Messages never carry server credentials; callers format only
/// `host:port` style identifiers into them.
#[derive(Error, Debug)]
pub enum TetherError {
    // Provider errors
    #[error("Subscription fetch failed: {0}")]
    Fetch(String),

    #[error("Malformed server entry: {0}")]
    Parse(String),

    #[error("Server probe failed: {0}")]
    Probe(String),

    // Supervisor errors
    #[error("Failed to write proxy configuration: {0}")]
    Artifact(String),

    #[error("Failed to launch proxy process: {0}")]
    Spawn(String),

    // Network errors
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timed out")]
    Timeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for Tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

impl TetherError {
    /// Errors that disqualify a single server rather than a whole fetch
    pub fn is_per_candidate(&self) -> bool {
        matches!(
            self,
            TetherError::Parse(_) | TetherError::Probe(_) | TetherError::Spawn(_)
        )
    }
}

// Convert from hyper errors
impl From<hyper::Error> for TetherError {
    fn from(err: hyper::Error) -> Self {
        TetherError::Http(err.to_string())
    }
}

impl From<http::Error> for TetherError {
    fn from(err: http::Error) -> Self {
        TetherError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for TetherError {
    fn from(err: url::ParseError) -> Self {
        TetherError::InvalidConfig(err.to_string())
    }
}

impl From<tokio_socks::Error> for TetherError {
    fn from(err: tokio_socks::Error) -> Self {
        TetherError::Tunnel(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TetherError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TetherError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(TetherError::Parse("line 3".to_string()).is_per_candidate());
        assert!(TetherError::Probe("1.2.3.4:443".to_string()).is_per_candidate());
        assert!(TetherError::Spawn("not found".to_string()).is_per_candidate());
        assert!(!TetherError::Fetch("boom".to_string()).is_per_candidate());
        assert!(!TetherError::Timeout.is_per_candidate());
        // A config path problem affects every server alike.
        assert!(!TetherError::Artifact("/tmp/ss.json".to_string()).is_per_candidate());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            TetherError::Fetch("status 503".to_string()).to_string(),
            "Subscription fetch failed: status 503"
        );
        assert_eq!(TetherError::Timeout.to_string(), "Operation timed out");
    }

    #[test]
    fn test_url_error_maps_to_config() {
        let err: TetherError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, TetherError::InvalidConfig(_)));
    }
}
