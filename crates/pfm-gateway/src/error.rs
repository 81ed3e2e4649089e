use pfm_core::CoreError;
use pfm_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("streaming is disabled")]
    StreamingDisabled,
}

impl GatewayError {
    /// Deployment bugs that must surface to the caller instead of being
    /// folded into a failed response.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Core(CoreError::InvalidConfiguration { .. }) | Self::Config(_))
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(e: toml::de::Error) -> Self {
        GatewayError::Config(e.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_errors_are_fatal() {
        assert!(GatewayError::Core(CoreError::invalid("falloff", "wobbly")).is_fatal());
        assert!(GatewayError::Config("bad toml".into()).is_fatal());
        assert!(!GatewayError::NotFound("x".into()).is_fatal());
        assert!(!GatewayError::Store(StoreError::unavailable("graph", "down")).is_fatal());
        assert!(!GatewayError::StreamingDisabled.is_fatal());
    }
}
