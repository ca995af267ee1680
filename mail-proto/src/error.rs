use thiserror::Error;

/// Every command handler catches and converts at the command boundary;
/// a `StoreError` never terminates the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    ProtocolState(String),

    #[error("authentication failed")]
    AuthFailure,

    #[error("{0}")]
    ResourceLimit(String),

    #[error("store error: {0}")]
    Store(#[from] mail_store::StoreError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("line too long")]
    LineTooLong,
}

impl From<mail_user::AuthError> for SessionError {
    fn from(e: mail_user::AuthError) -> Self {
        match e {
            mail_user::AuthError::Store(s) => SessionError::Store(s),
            _ => SessionError::AuthFailure,
        }
    }
}
