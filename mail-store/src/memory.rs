//! A process-local `MailboxStore`. This implementation is intentionally
//! minimal: when the process exits, all data is lost. It backs the test
//! suite and is the default backend `mailcore` falls back on when no
//! external database is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::entities::{
    ApiKey, ApiKeyId, Attachment, Email, EmailId, FlagBits, Recipient, RecipientType, Scope, User,
    UserId,
};
use crate::error::StoreError;
use crate::store::MailboxStore;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    api_keys: HashMap<ApiKeyId, ApiKey>,
    emails: HashMap<EmailId, Email>,
    recipients: HashMap<EmailId, Vec<Recipient>>,
    attachments: HashMap<EmailId, Vec<Attachment>>,
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
    next_user_id: AtomicU64,
    next_key_id: AtomicU64,
    next_email_id: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_user_id: AtomicU64::new(1),
            next_key_id: AtomicU64::new(1),
            next_email_id: AtomicU64::new(1),
        }
    }

    /// Test/seed helper: insert a fully-formed email with its recipients
    /// and attachments, bypassing the submission path this core does not
    /// implement (SMTP ingestion is out of scope).
    pub async fn seed_email(
        &self,
        email: Email,
        recipients: Vec<Recipient>,
        attachments: Vec<Attachment>,
    ) -> EmailId {
        let id = email.id;
        let mut tables = self.tables.write().await;
        tables.emails.insert(id, email);
        tables.recipients.insert(id, recipients);
        tables.attachments.insert(id, attachments);
        id
    }

    pub fn next_email_id(&self) -> EmailId {
        EmailId(self.next_email_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl MailboxStore for InMemoryStore {
    async fn find_user_by_address(&self, address: &str) -> Result<Option<User>, StoreError> {
        let lower = address.to_ascii_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.owns_address(&lower))
            .cloned())
    }

    async fn find_user_by_oidc(
        &self,
        issuer: &str,
        subject: &str,
    ) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.oidc_issuer == issuer && u.oidc_subject == subject)
            .cloned())
    }

    async fn find_user(&self, user_id: UserId) -> Result<User, StoreError> {
        let tables = self.tables.read().await;
        tables
            .users
            .get(&user_id)
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    async fn create_user(
        &self,
        issuer: &str,
        subject: &str,
        primary_address: &str,
    ) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        let lower = primary_address.to_ascii_lowercase();
        if tables
            .users
            .values()
            .any(|u| (u.oidc_issuer == issuer && u.oidc_subject == subject) || u.primary_address == lower)
        {
            return Err(StoreError::Conflict);
        }
        let id = UserId(self.next_user_id.fetch_add(1, Ordering::Relaxed));
        let user = User {
            id,
            oidc_issuer: issuer.to_string(),
            oidc_subject: subject.to_string(),
            primary_address: lower,
            additional_addresses: Vec::new(),
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn create_api_key(
        &self,
        user_id: UserId,
        display_name: &str,
        prefix: &str,
        password_hash: &str,
        scopes: &[Scope],
    ) -> Result<ApiKey, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound);
        }
        let id = ApiKeyId(self.next_key_id.fetch_add(1, Ordering::Relaxed));
        let key = ApiKey {
            id,
            user_id,
            display_name: display_name.to_string(),
            prefix: prefix.to_string(),
            password_hash: password_hash.to_string(),
            scopes: scopes.iter().copied().collect(),
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
        };
        tables.api_keys.insert(id, key.clone());
        Ok(key)
    }

    async fn active_api_keys_for_user(&self, user_id: UserId) -> Result<Vec<ApiKey>, StoreError> {
        let tables = self.tables.read().await;
        let mut keys: Vec<ApiKey> = tables
            .api_keys
            .values()
            .filter(|k| k.user_id == user_id && k.is_active())
            .cloned()
            .collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.created_at));
        Ok(keys)
    }

    async fn revoke_api_key(&self, key_id: ApiKeyId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let key = tables
            .api_keys
            .get_mut(&key_id)
            .ok_or(StoreError::ApiKeyNotFound)?;
        key.revoked_at = Some(Utc::now());
        Ok(())
    }

    async fn touch_api_key_last_used(
        &self,
        key_id: ApiKeyId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(key) = tables.api_keys.get_mut(&key_id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn mailbox_emails_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<(Email, Option<Recipient>)>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<(Email, Option<Recipient>)> = Vec::new();
        for email in tables.emails.values() {
            let recipients = tables.recipients.get(&email.id).map(|v| v.as_slice()).unwrap_or(&[]);
            let mine = recipients.iter().find(|r| r.user_id == Some(user_id)).cloned();
            let participates = mine.is_some() || email.sent_by_user == Some(user_id);
            if participates {
                out.push((email.clone(), mine));
            }
        }
        out.sort_by(|a, b| (a.0.received_at, a.0.id).cmp(&(b.0.received_at, b.0.id)));
        Ok(out)
    }

    async fn email_recipients(&self, email_id: EmailId) -> Result<Vec<Recipient>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.recipients.get(&email_id).cloned().unwrap_or_default())
    }

    async fn render_email(
        &self,
        email_id: EmailId,
        requesting_user: UserId,
    ) -> Result<Vec<u8>, StoreError> {
        let tables = self.tables.read().await;
        let email = tables.emails.get(&email_id).ok_or(StoreError::EmailNotFound)?;
        let recipients = tables.recipients.get(&email_id).map(|v| v.as_slice()).unwrap_or(&[]);
        let attachments = tables.attachments.get(&email_id).map(|v| v.as_slice()).unwrap_or(&[]);
        let is_sender = email.sent_by_user == Some(requesting_user);
        Ok(crate::render::render_rfc5322(email, recipients, attachments, is_sender))
    }

    async fn email_size_bytes(&self, email_id: EmailId) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        let email = tables.emails.get(&email_id).ok_or(StoreError::EmailNotFound)?;
        let recipients = tables.recipients.get(&email_id).map(|v| v.as_slice()).unwrap_or(&[]);
        let attachments = tables.attachments.get(&email_id).map(|v| v.as_slice()).unwrap_or(&[]);
        Ok(email.size_bytes(recipients, attachments))
    }

    async fn set_recipient_read(
        &self,
        email_id: EmailId,
        user_id: UserId,
        is_read: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let recipients = tables.recipients.get_mut(&email_id).ok_or(StoreError::EmailNotFound)?;
        if let Some(r) = recipients.iter_mut().find(|r| r.user_id == Some(user_id)) {
            r.is_read = is_read;
        }
        Ok(())
    }

    async fn set_recipient_flags(
        &self,
        email_id: EmailId,
        user_id: UserId,
        flags: FlagBits,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let recipients = tables.recipients.get_mut(&email_id).ok_or(StoreError::EmailNotFound)?;
        if let Some(r) = recipients.iter_mut().find(|r| r.user_id == Some(user_id)) {
            r.flags = flags;
        }
        Ok(())
    }

    async fn apply_deletions(
        &self,
        user_id: UserId,
        email_ids: &[EmailId],
    ) -> Result<Vec<EmailId>, StoreError> {
        let mut tables = self.tables.write().await;
        let mut deleted = Vec::new();
        for &id in email_ids {
            let authorized = match tables.emails.get(&id) {
                Some(email) => {
                    email.sent_by_user == Some(user_id)
                        || tables
                            .recipients
                            .get(&id)
                            .map(|rs| rs.iter().any(|r| r.user_id == Some(user_id)))
                            .unwrap_or(false)
                }
                None => false,
            };
            if authorized {
                tables.emails.remove(&id);
                tables.recipients.remove(&id);
                tables.attachments.remove(&id);
                deleted.push(id);
            }
        }
        Ok(deleted)
    }

    async fn unread_count(&self, user_id: UserId) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        let count = tables
            .recipients
            .values()
            .flat_map(|rs| rs.iter())
            .filter(|r| r.user_id == Some(user_id) && !r.is_read)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_find_user() {
        let store = InMemoryStore::new();
        let user = store
            .create_user("https://issuer.example", "sub-1", "Alice@Example.com")
            .await
            .unwrap();
        assert_eq!(user.primary_address, "alice@example.com");

        let found = store
            .find_user_by_oidc("https://issuer.example", "sub-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);

        let by_addr = store
            .find_user_by_address("ALICE@EXAMPLE.COM")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_addr.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_oidc_identity_conflicts() {
        let store = InMemoryStore::new();
        store
            .create_user("iss", "sub", "a@example.com")
            .await
            .unwrap();
        let err = store.create_user("iss", "sub", "b@example.com").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn mailbox_emails_include_sent_and_received() {
        let store = InMemoryStore::new();
        let alice = store.create_user("iss", "a", "alice@example.com").await.unwrap();
        let bob = store.create_user("iss", "b", "bob@example.com").await.unwrap();

        let id1 = store.next_email_id();
        store
            .seed_email(
                Email {
                    id: id1,
                    message_id: "<1@x>".into(),
                    from_address: "bob@example.com".into(),
                    from_display_name: "Bob".into(),
                    subject: "hi".into(),
                    text_body: Some("hello".into()),
                    html_body: None,
                    received_at: Utc::now(),
                    in_reply_to: None,
                    references: vec![],
                    thread_id: None,
                    sent_by_user: Some(bob.id),
                },
                vec![Recipient {
                    email_id: id1,
                    address: "alice@example.com".into(),
                    display_name: "Alice".into(),
                    kind: RecipientType::To,
                    user_id: Some(alice.id),
                    is_read: false,
                    flags: FlagBits::default(),
                }],
                vec![],
            )
            .await;

        let view = store.mailbox_emails_for_user(alice.id).await.unwrap();
        assert_eq!(view.len(), 1);
        assert!(view[0].1.is_some());
    }
}
