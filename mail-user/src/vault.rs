//! CredentialVault: generate/verify API keys, enforce scope membership,
//! and run the short-TTL auth cache plus last-used-at update queue. A
//! provider object wrapping a store, handed to the protocol layer as a
//! shared `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use mail_store::{ApiKey, ApiKeyId, MailboxStore, Scope, UserId};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::error::AuthError;

const CACHE_TTL: Duration = Duration::from_secs(30);
const CACHE_CAPACITY: u64 = 10_000;
const PLAINTEXT_LEN: usize = 32;
const PREFIX_LEN: usize = 12;

/// The outcome of a successful `verify()` call.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: UserId,
    pub api_key_id: ApiKeyId,
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Positive {
        user_id: UserId,
        api_key_id: ApiKeyId,
        scopes: Vec<Scope>,
    },
    Negative,
}

/// Auth attempt/failure counters consumed by `AuditTelemetry`.
#[derive(Default)]
pub struct AuthCounters {
    pub attempts: AtomicU64,
    pub failures: AtomicU64,
    pub cache_hits: AtomicU64,
}

impl AuthCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.attempts.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
            self.cache_hits.load(Ordering::Relaxed),
        )
    }
}

pub struct CredentialVault {
    store: Arc<dyn MailboxStore>,
    cache: moka::sync::Cache<String, CacheEntry>,
    touch_tx: mpsc::UnboundedSender<(ApiKeyId, chrono::DateTime<Utc>)>,
    pub counters: Arc<AuthCounters>,
}

impl CredentialVault {
    pub fn new(store: Arc<dyn MailboxStore>) -> Self {
        let cache = moka::sync::Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(CACHE_TTL)
            .build();

        let (touch_tx, mut touch_rx) = mpsc::unbounded_channel::<(ApiKeyId, chrono::DateTime<Utc>)>();
        let bg_store = store.clone();
        tokio::spawn(async move {
            while let Some((key_id, at)) = touch_rx.recv().await {
                if let Err(e) = bg_store.touch_api_key_last_used(key_id, at).await {
                    tracing::warn!(err=?e, key_id=%key_id, "failed to persist api key last-used-at");
                }
            }
        });

        Self {
            store,
            cache,
            touch_tx,
            counters: Arc::new(AuthCounters::default()),
        }
    }

    /// Generates a new secret: a URL-safe random plaintext, its
    /// non-secret prefix, and a bcrypt hash of the full plaintext. The
    /// plaintext is never stored; it is returned exactly once.
    pub fn generate(&self) -> Result<(String, String, String), AuthError> {
        let plaintext: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PLAINTEXT_LEN)
            .map(char::from)
            .collect();
        let prefix = plaintext.chars().take(PREFIX_LEN).collect::<String>();
        let hash = bcrypt::hash(&plaintext, bcrypt::DEFAULT_COST)
            .map_err(|e| AuthError::Store(mail_store::StoreError::Backend(e.to_string())))?;
        Ok((plaintext, prefix, hash))
    }

    pub async fn create_api_key(
        &self,
        user_id: UserId,
        display_name: &str,
        scopes: &[Scope],
    ) -> Result<(ApiKey, String), AuthError> {
        let (plaintext, prefix, hash) = self.generate()?;
        let key = self
            .store
            .create_api_key(user_id, display_name, &prefix, &hash, scopes)
            .await?;
        Ok((key, plaintext))
    }

    fn cache_key(address: &str, plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(address.to_ascii_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(plaintext.as_bytes());
        STANDARD.encode(hasher.finalize())
    }

    /// Checks the short-TTL cache first; on a miss, hashes and checks
    /// against the stored ApiKey, caches the outcome, and enqueues a
    /// last-used-at update for a verified key.
    pub async fn verify(
        &self,
        address: &str,
        plaintext: &str,
        required_scope: Scope,
    ) -> Result<VerifiedIdentity, AuthError> {
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);

        let key = Self::cache_key(address, plaintext);
        if let Some(entry) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return match entry {
                CacheEntry::Positive {
                    user_id,
                    api_key_id,
                    scopes,
                } => {
                    let _ = self.touch_tx.send((api_key_id, Utc::now()));
                    if scopes.contains(&required_scope) {
                        Ok(VerifiedIdentity {
                            user_id,
                            api_key_id,
                            scopes,
                        })
                    } else {
                        Err(AuthError::MissingScope)
                    }
                }
                CacheEntry::Negative => Err(AuthError::WrongSecret),
            };
        }

        let result = self.verify_uncached(address, plaintext, required_scope).await;
        let entry = match &result {
            Ok(identity) => CacheEntry::Positive {
                user_id: identity.user_id,
                api_key_id: identity.api_key_id,
                scopes: identity.scopes.clone(),
            },
            Err(_) => CacheEntry::Negative,
        };
        self.cache.insert(key, entry);

        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn verify_uncached(
        &self,
        address: &str,
        plaintext: &str,
        required_scope: Scope,
    ) -> Result<VerifiedIdentity, AuthError> {
        let user = self
            .store
            .find_user_by_address(address)
            .await?
            .ok_or(AuthError::UnknownUser)?;

        let keys = self.store.active_api_keys_for_user(user.id).await?;

        for key in keys {
            let matches = bcrypt::verify(plaintext, &key.password_hash).unwrap_or(false);
            if matches {
                let _ = self.touch_tx.send((key.id, Utc::now()));
                if !key.has_scope(required_scope) {
                    return Err(AuthError::MissingScope);
                }
                return Ok(VerifiedIdentity {
                    user_id: user.id,
                    api_key_id: key.id,
                    scopes: key.scopes.iter().copied().collect(),
                });
            }
        }

        Err(AuthError::WrongSecret)
    }

    pub fn has_scope(identity: &VerifiedIdentity, scope: Scope) -> bool {
        identity.scopes.contains(&scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_store::memory::InMemoryStore;

    async fn new_vault() -> (CredentialVault, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (CredentialVault::new(store.clone()), store)
    }

    #[tokio::test]
    async fn generate_then_verify_succeeds_with_correct_scope() {
        let (vault, store) = new_vault().await;
        let user = store.create_user("iss", "sub", "alice@example.com").await.unwrap();
        let (_key, plaintext) = vault
            .create_api_key(user.id, "laptop", &[Scope::Imap])
            .await
            .unwrap();

        let result = vault.verify("alice@example.com", &plaintext, Scope::Imap).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wrong_scope_fails_scenario_d() {
        let (vault, store) = new_vault().await;
        let user = store.create_user("iss", "sub", "alice@example.com").await.unwrap();
        let (_key, plaintext) = vault
            .create_api_key(user.id, "laptop", &[Scope::Smtp])
            .await
            .unwrap();

        let result = vault.verify("alice@example.com", &plaintext, Scope::Imap).await;
        assert!(matches!(result, Err(AuthError::MissingScope)));
    }

    #[tokio::test]
    async fn wrong_secret_fails_and_is_cached_negative() {
        let (vault, store) = new_vault().await;
        let user = store.create_user("iss", "sub", "alice@example.com").await.unwrap();
        vault
            .create_api_key(user.id, "laptop", &[Scope::Imap])
            .await
            .unwrap();

        let first = vault.verify("alice@example.com", "not-the-secret", Scope::Imap).await;
        assert!(first.is_err());
        let (attempts_before, failures_before, _) = vault.counters.snapshot();

        let second = vault.verify("alice@example.com", "not-the-secret", Scope::Imap).await;
        assert!(second.is_err());
        let (attempts_after, failures_after, cache_hits_after) = vault.counters.snapshot();

        assert_eq!(attempts_after, attempts_before + 1);
        // cache hit: failure counter must NOT increment again
        assert_eq!(failures_after, failures_before);
        assert!(cache_hits_after >= 1);
    }

    #[tokio::test]
    async fn revoked_key_no_longer_verifies() {
        let (vault, store) = new_vault().await;
        let user = store.create_user("iss", "sub", "alice@example.com").await.unwrap();
        let (key, plaintext) = vault
            .create_api_key(user.id, "laptop", &[Scope::Imap])
            .await
            .unwrap();
        store.revoke_api_key(key.id).await.unwrap();

        let result = vault.verify("alice@example.com", &plaintext, Scope::Imap).await;
        assert!(result.is_err());
    }
}
