use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{ApiKey, ApiKeyId, Email, EmailId, FlagBits, Recipient, Scope, User, UserId};
use crate::error::StoreError;

/// Persistence of Email/Recipient/Attachment/User/ApiKey/Label entities;
/// atomic bulk operations; streaming iteration.
///
/// Concrete backends (a relational database behind a connection pool, an
/// object-storage-backed CRDT log, ...) live outside this crate's
/// responsibility: database migrations, query planning, and full-text
/// indexing strategy are all behind this interface, not part of it.
/// `InMemoryStore` in `crate::memory` is the reference implementation used
/// by tests and by `mailcore` when no external database is configured.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    async fn find_user_by_address(&self, address: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_oidc(
        &self,
        issuer: &str,
        subject: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn find_user(&self, user_id: UserId) -> Result<User, StoreError>;

    async fn create_user(
        &self,
        issuer: &str,
        subject: &str,
        primary_address: &str,
    ) -> Result<User, StoreError>;

    async fn create_api_key(
        &self,
        user_id: UserId,
        display_name: &str,
        prefix: &str,
        password_hash: &str,
        scopes: &[Scope],
    ) -> Result<ApiKey, StoreError>;

    /// Active (not revoked) keys for a user, most-recently-created first.
    async fn active_api_keys_for_user(&self, user_id: UserId) -> Result<Vec<ApiKey>, StoreError>;

    async fn revoke_api_key(&self, key_id: ApiKeyId) -> Result<(), StoreError>;

    /// Enqueued asynchronously by CredentialVault;
    /// never awaited on the authentication hot path.
    async fn touch_api_key_last_used(
        &self,
        key_id: ApiKeyId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Every email the user participates in (recipient or sender),
    /// ordered by `receivedAt` ascending, together with that user's
    /// Recipient projection row for each. An email the
    /// user only sent (no Recipient row for them) yields `None` in the
    /// second slot of the tuple.
    async fn mailbox_emails_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(Email, Option<Recipient>)>, StoreError>;

    async fn email_recipients(&self, email_id: EmailId) -> Result<Vec<Recipient>, StoreError>;

    /// Full RFC 5322 serialization of a stored email for this requesting
    /// user (Bcc is included only when `requesting_user` is the sender).
    async fn render_email(
        &self,
        email_id: EmailId,
        requesting_user: UserId,
    ) -> Result<Vec<u8>, StoreError>;

    async fn email_size_bytes(&self, email_id: EmailId) -> Result<u64, StoreError>;

    /// Writes through `\Seen` as `is_read` on the matching Recipient row.
    async fn set_recipient_read(
        &self,
        email_id: EmailId,
        user_id: UserId,
        is_read: bool,
    ) -> Result<(), StoreError>;

    /// Persists the non-`\Seen` flag bits in per-user IMAP side-state.
    async fn set_recipient_flags(
        &self,
        email_id: EmailId,
        user_id: UserId,
        flags: FlagBits,
    ) -> Result<(), StoreError>;

    /// A single transactional bulk delete. Deletes only
    /// rows where `user_id` is a recipient or the sender; returns the
    /// count actually deleted (may be less than `email_ids.len()` on
    /// partial authorization failure).
    async fn apply_deletions(
        &self,
        user_id: UserId,
        email_ids: &[EmailId],
    ) -> Result<Vec<EmailId>, StoreError>;

    /// Count of unread messages visible to the user, for
    /// `NotificationBus::unread_count_changed` and IMAP `STATUS UNSEEN`.
    async fn unread_count(&self, user_id: UserId) -> Result<u64, StoreError>;
}
