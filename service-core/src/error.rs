use thiserror::Error;

/// Infrastructure-level error for startup, configuration and persistence plumbing.
///
/// Request handling uses the owning service's domain error instead; this type
/// never reaches a client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts() {
        let err: AppError = config::ConfigError::Message("missing".into()).into();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn io_error_converts() {
        let err: AppError = std::io::Error::other("bind failed").into();
        assert!(err.to_string().contains("bind failed"));
    }
}
