use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoxflowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{}: {message}", code.as_str())]
    Admission {
        code: AdmissionCode,
        message: String,
    },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Timed out waiting for {0}")]
    TimedOut(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Machine-matchable admission rejection codes. Clients match on this
/// prefix in error units to distinguish backpressure from other failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionCode {
    StreamLimit,
    RateLimit,
}

impl AdmissionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionCode::StreamLimit => "ERR_STREAM_LIMIT",
            AdmissionCode::RateLimit => "ERR_RATE_LIMIT",
        }
    }
}

pub type Result<T> = std::result::Result<T, VoxflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_error_carries_code_prefix() {
        let err = VoxflowError::Admission {
            code: AdmissionCode::RateLimit,
            message: "too many messages".into(),
        };
        assert!(err.to_string().starts_with("ERR_RATE_LIMIT"));
    }
}
