// src/infra/errors.rs — Error types for counseldesk

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    // Caller errors
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Illegal {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    // External dependencies (retriable when transient)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Unparseable model response: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Audio is {size} bytes, above the {limit} byte transcription limit")]
    FileTooLarge { size: u64, limit: u64 },

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DeskError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Recover a typed error that travelled through an `anyhow::Error`
    /// (store closures return anyhow).
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<DeskError>() {
            Ok(desk) => desk,
            Err(err) => match err.downcast::<rusqlite::Error>() {
                Ok(db) => DeskError::Database(db),
                Err(other) => DeskError::Other(other),
            },
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DeskError::Provider {
                retriable: true,
                ..
            } | DeskError::RateLimited { .. }
        )
    }

    /// Stable machine-readable code, persisted on failed tasks.
    pub fn code(&self) -> &'static str {
        match self {
            DeskError::Unauthorized(_) => "UNAUTHORIZED",
            DeskError::Forbidden(_) => "FORBIDDEN",
            DeskError::NotFound { .. } => "NOT_FOUND",
            DeskError::Validation(_) => "VALIDATION_ERROR",
            DeskError::Conflict(_) => "CONFLICT",
            DeskError::InvalidTransition { .. } => "INVALID_TRANSITION",
            DeskError::Provider { .. } => "PROVIDER_ERROR",
            DeskError::RateLimited { .. } => "RATE_LIMITED",
            DeskError::Parse(_) => "ANALYSIS_PARSE_ERROR",
            DeskError::Storage(_) => "DOWNLOAD_ERROR",
            DeskError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            DeskError::Database(_) => "DATABASE_ERROR",
            DeskError::Config(_) => "CONFIG_ERROR",
            DeskError::Io(_) => "IO_ERROR",
            DeskError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let transient = DeskError::Provider {
            provider: "openai".into(),
            message: "HTTP 503".into(),
            retriable: true,
        };
        let permanent = DeskError::Provider {
            provider: "openai".into(),
            message: "HTTP 400".into(),
            retriable: false,
        };
        let limited = DeskError::RateLimited {
            provider: "whisper".into(),
            retry_after_ms: 1000,
        };
        assert!(transient.is_retriable());
        assert!(limited.is_retriable());
        assert!(!permanent.is_retriable());
        assert!(!DeskError::Validation("x".into()).is_retriable());
    }

    #[test]
    fn test_from_anyhow_recovers_typed_error() {
        let wrapped = anyhow::Error::new(DeskError::Conflict("busy".into()));
        assert!(matches!(
            DeskError::from_anyhow(wrapped),
            DeskError::Conflict(_)
        ));
        let plain = anyhow::anyhow!("boom");
        assert!(matches!(DeskError::from_anyhow(plain), DeskError::Other(_)));
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            DeskError::FileTooLarge {
                size: 30,
                limit: 25
            }
            .code(),
            "FILE_TOO_LARGE"
        );
        assert_eq!(DeskError::not_found("Session", "abc").code(), "NOT_FOUND");
        assert_eq!(
            DeskError::not_found("Session", "abc").to_string(),
            "Session 'abc' not found"
        );
    }
}
