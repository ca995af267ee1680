use thiserror::Error;

/// Unknown user, wrong secret, or missing scope. The three reasons are
/// never distinguished on the wire, only in telemetry (the variant name
/// here, logged but not rendered to the client).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication failed")]
    UnknownUser,
    #[error("authentication failed")]
    WrongSecret,
    #[error("authentication failed")]
    MissingScope,
    #[error("store error: {0}")]
    Store(#[from] mail_store::StoreError),
}

impl AuthError {
    /// No distinction between the three reasons is leaked on the wire.
    pub fn wire_message(&self) -> &'static str {
        "Authentication failed"
    }
}
