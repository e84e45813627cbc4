use thiserror::Error;

/// Error taxonomy shared across crates, matching the classification in
/// the design notes: transient vs permanent external failures, idempotency
/// conflicts (treated as success by callers), integrity violations and
/// configuration errors.
#[derive(Debug, Error)]
pub enum PurserError {
    #[error("transient external failure in {subsystem}: {source}")]
    TransientExternal {
        subsystem: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("permanent external failure: {0}")]
    PermanentExternal(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PurserError {
    pub fn transient(subsystem: &'static str, source: impl Into<anyhow::Error>) -> Self {
        PurserError::TransientExternal {
            subsystem,
            source: source.into(),
        }
    }
}

/// Stable, user-visible error surfaced at the HTTP boundary: a taxonomy
/// class plus an HTTP status code, decoupled from the internal error enum
/// so internal refactors never change the wire contract.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiError {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            code: "validation_error",
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: 401,
            code: "unauthorized",
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: 503,
            code: "service_unavailable",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl From<&PurserError> for ApiError {
    fn from(err: &PurserError) -> Self {
        match err {
            PurserError::TransientExternal { .. } => ApiError::internal(err.to_string()),
            PurserError::PermanentExternal(msg) => ApiError::bad_request(msg.clone()),
            PurserError::IntegrityViolation(msg) => ApiError::bad_request(msg.clone()),
            PurserError::Configuration(msg) => ApiError::service_unavailable(msg.clone()),
            PurserError::NotFound(msg) => ApiError {
                status: 404,
                code: "not_found",
                message: msg.clone(),
            },
            PurserError::Database(e) => ApiError::internal(e.to_string()),
            PurserError::Other(e) => ApiError::internal(e.to_string()),
        }
    }
}

pub type PurserResult<T> = Result<T, PurserError>;
