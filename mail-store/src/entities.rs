//! The core entities: User, ApiKey, Email, Recipient, Attachment, Label.
//!
//! Each entity is a stable identifier plus an indexed lookup rather than
//! a hydrated bidirectional object graph.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Per-user IMAP flag bits other than `\Seen`, which is the Recipient's
/// `is_read` bit. Persisted alongside the Recipient row (see DESIGN.md,
/// Open Question 2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagBits {
    pub answered: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub draft: bool,
}

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_id!(UserId);
newtype_id!(ApiKeyId);
newtype_id!(EmailId);
newtype_id!(LabelId);

/// Identity established by an external OIDC issuer+subject pair.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub oidc_issuer: String,
    pub oidc_subject: String,
    /// Always lower-cased; unique across users.
    pub primary_address: String,
    pub additional_addresses: Vec<String>,
}

impl User {
    pub fn owns_address(&self, address: &str) -> bool {
        let lower = address.to_ascii_lowercase();
        self.primary_address == lower
            || self
                .additional_addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&lower))
    }
}

/// Permission scopes an ApiKey can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Smtp,
    Pop3,
    Imap,
    ApiRead,
    ApiWrite,
    Internal,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Smtp => "smtp",
            Scope::Pop3 => "pop3",
            Scope::Imap => "imap",
            Scope::ApiRead => "api:read",
            Scope::ApiWrite => "api:write",
            Scope::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "smtp" => Some(Scope::Smtp),
            "pop3" => Some(Scope::Pop3),
            "imap" => Some(Scope::Imap),
            "api:read" => Some(Scope::ApiRead),
            "api:write" => Some(Scope::ApiWrite),
            "internal" => Some(Scope::Internal),
            _ => None,
        }
    }
}

/// An API key: opaque display name, lookup prefix, bcrypt hash of the
/// secret, scope set, and the lifecycle timestamps (created, last used,
/// revoked).
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub display_name: String,
    /// First 12 bytes of the plaintext, used for fast lookup only; never
    /// sufficient on its own to authenticate.
    pub prefix: String,
    pub password_hash: String,
    pub scopes: BTreeSet<Scope>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientType {
    To,
    Cc,
    Bcc,
}

/// A per-user, per-email recipient projection row: address, display name,
/// recipient type, the owning user (if any), and that user's read state.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub email_id: EmailId,
    pub address: String,
    pub display_name: String,
    pub kind: RecipientType,
    pub user_id: Option<UserId>,
    pub is_read: bool,
    pub flags: FlagBits,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub email_id: EmailId,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// An immutable received message. Bodies and attachments are
/// read-only once stored; only per-recipient `is_read` mutates.
#[derive(Debug, Clone)]
pub struct Email {
    pub id: EmailId,
    pub message_id: String,
    pub from_address: String,
    pub from_display_name: String,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub thread_id: Option<String>,
    pub sent_by_user: Option<UserId>,
}

impl Email {
    pub fn size_bytes(&self, recipients: &[Recipient], attachments: &[Attachment]) -> u64 {
        let mut n = self.text_body.as_ref().map(|s| s.len()).unwrap_or(0)
            + self.html_body.as_ref().map(|s| s.len()).unwrap_or(0)
            + self.subject.len()
            + self.from_address.len();
        for r in recipients {
            n += r.address.len();
        }
        for a in attachments {
            n += a.size();
        }
        n as u64
    }
}

/// Per-user named color tag; unique `(userId, name)`.
#[derive(Debug, Clone)]
pub struct Label {
    pub id: LabelId,
    pub user_id: UserId,
    pub name: String,
    pub color: String,
}
