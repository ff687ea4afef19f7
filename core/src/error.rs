use thiserror::Error;

/// Game-level error taxonomy. Per-command handlers return these and the
/// dispatcher renders them as a single styled line without dropping the
/// session.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("insufficient resources")]
    InsufficientResources,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("{0}")]
    Conflict(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GameError::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        GameError::InvalidArgument(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        GameError::PermissionDenied(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        GameError::Conflict(msg.into())
    }

    pub fn internal(msg: impl ToString) -> Self {
        GameError::Internal(msg.to_string())
    }
}

impl From<sqlx::Error> for GameError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => GameError::NotFound("record".to_string()),
            other => GameError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for GameError {
    fn from(e: serde_json::Error) -> Self {
        GameError::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GameError>;
