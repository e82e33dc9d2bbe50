use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} already has a server bound")]
    AlreadyBound(String),

    #[error("Session closed: {0}")]
    Closed(String),
}
