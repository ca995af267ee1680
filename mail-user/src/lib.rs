pub mod error;
pub mod registry;
pub mod vault;

pub use error::AuthError;
pub use mail_store::Scope;
pub use registry::ConnectionRegistry;
pub use vault::{AuthCounters, CredentialVault, VerifiedIdentity};
