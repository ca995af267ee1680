use thiserror::Error;

/// Persistence failures. The protocol layer never lets one of these
/// terminate a session; it logs with structured context and replies
/// `BAD Internal server error`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such user")]
    UserNotFound,
    #[error("no such api key")]
    ApiKeyNotFound,
    #[error("no such email")]
    EmailNotFound,
    #[error("(issuer, subject) or primary address already registered")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}
