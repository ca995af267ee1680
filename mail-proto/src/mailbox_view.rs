//! MessageView: the per-session ordered projection of a mailbox, with its
//! UID-assignment rule and UIDVALIDITY bump decision (see DESIGN.md Open
//! Question 1). Adapts a plain store snapshot into the sequence/UID
//! bookkeeping a session needs, reloaded fresh on every SELECT rather than
//! diffed against a live sync feed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use mail_store::{Email, EmailId, MailboxStore, Recipient, User};

use crate::error::SessionError;
use crate::flags::Flags;

#[derive(Debug, Clone)]
pub struct MessageHandle {
    pub email_id: EmailId,
    pub uid: u32,
    pub seq: u32,
    pub flags: Flags,
    pub internal_date: DateTime<Utc>,
    pub message_id: String,
    pub subject: String,
    pub from_address: String,
    pub from_display_name: String,
}

/// An ordered list of `MessageHandle`s for the current SELECT.
#[derive(Default)]
pub struct MessageView {
    handles: Vec<MessageHandle>,
}

impl MessageView {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageHandle> {
        self.handles.iter()
    }

    pub fn by_seq(&self, seq: u32) -> Option<&MessageHandle> {
        self.handles.iter().find(|h| h.seq == seq)
    }

    pub fn by_seq_mut(&mut self, seq: u32) -> Option<&mut MessageHandle> {
        self.handles.iter_mut().find(|h| h.seq == seq)
    }

    pub fn by_uid(&self, uid: u32) -> Option<&MessageHandle> {
        self.handles.iter().find(|h| h.uid == uid)
    }

    pub fn by_uid_mut(&mut self, uid: u32) -> Option<&mut MessageHandle> {
        self.handles.iter_mut().find(|h| h.uid == uid)
    }

    /// Largest sequence number, or `1` when empty.
    pub fn largest_seq(&self) -> u32 {
        self.handles.len().max(1) as u32
    }

    /// Largest UID, or `1` when empty.
    pub fn largest_uid(&self) -> u32 {
        self.handles.iter().map(|h| h.uid).max().unwrap_or(1)
    }

    /// `max(uid)+1`, or `1` when empty.
    pub fn uid_next(&self) -> u32 {
        self.handles.iter().map(|h| h.uid).max().map(|m| m + 1).unwrap_or(1)
    }

    /// Removes the handles whose UID is in `uids`, returning them ordered
    /// by **descending** sequence number, then renumbers the remaining
    /// handles densely.
    pub fn remove_by_uids_descending(&mut self, uids: &HashSet<u32>) -> Vec<MessageHandle> {
        let mut removed: Vec<MessageHandle> = self
            .handles
            .iter()
            .filter(|h| uids.contains(&h.uid))
            .cloned()
            .collect();
        removed.sort_by(|a, b| b.seq.cmp(&a.seq));

        self.handles.retain(|h| !uids.contains(&h.uid));
        self.renumber();
        removed
    }

    fn renumber(&mut self) {
        for (idx, h) in self.handles.iter_mut().enumerate() {
            h.seq = (idx + 1) as u32;
        }
    }
}

/// Tracks the UID assigned to each email across reloads within one
/// session, and decides when UIDVALIDITY must bump: whenever an email
/// the assigner has not yet seen would sort ahead of an already-assigned
/// email (a backdated insert), the prior mapping is discarded and
/// UIDVALIDITY advances.
pub struct UidAssigner {
    uid_validity: u32,
    assigned: HashMap<EmailId, u32>,
    next_free: u32,
}

impl UidAssigner {
    pub fn new(user_id: mail_store::UserId) -> Self {
        Self {
            uid_validity: derive_uid_validity(user_id),
            assigned: HashMap::new(),
            next_free: 1,
        }
    }

    pub fn uid_validity(&self) -> u32 {
        self.uid_validity
    }

    /// Assigns UIDs to `sorted_email_ids` (already ordered by
    /// `(receivedAt, emailId)` ascending), bumping UIDVALIDITY first if a
    /// reorder relative to the previous assignment is detected.
    pub fn assign(&mut self, sorted_email_ids: &[EmailId]) -> Vec<u32> {
        if self.reorder_detected(sorted_email_ids) {
            self.uid_validity = self.uid_validity.wrapping_add(1).max(1);
            self.assigned.clear();
            self.next_free = 1;
        }

        sorted_email_ids
            .iter()
            .map(|id| {
                *self.assigned.entry(*id).or_insert_with(|| {
                    let uid = self.next_free;
                    self.next_free += 1;
                    uid
                })
            })
            .collect()
    }

    /// True when an email not yet in `self.assigned` sorts ahead of one
    /// that is: a backdated insert relative to the previous assignment.
    fn reorder_detected(&self, sorted_email_ids: &[EmailId]) -> bool {
        let mut known_after = false;
        for id in sorted_email_ids.iter().rev() {
            if self.assigned.contains_key(id) {
                known_after = true;
            } else if known_after {
                return true;
            }
        }
        false
    }
}

/// `0` is mapped to `1`; takes the low 32
/// bits of the user identifier.
fn derive_uid_validity(user_id: mail_store::UserId) -> u32 {
    let raw = (user_id.as_u64() & 0xFFFF_FFFF) as u32;
    if raw == 0 {
        1
    } else {
        raw
    }
}

/// Loads every email the user participates in, sorted by `(receivedAt,
/// emailId)` ascending, and assigns sequence numbers and UIDs.
pub async fn load(
    store: &dyn MailboxStore,
    user: &User,
    uid_assigner: &mut UidAssigner,
) -> Result<MessageView, SessionError> {
    let mut rows = store.mailbox_emails_for_user(user.id).await?;
    rows.sort_by(|(a, _), (b, _)| {
        a.received_at
            .cmp(&b.received_at)
            .then(a.id.as_u64().cmp(&b.id.as_u64()))
    });

    let ids: Vec<EmailId> = rows.iter().map(|(e, _)| e.id).collect();
    let uids = uid_assigner.assign(&ids);

    let mut handles = Vec::with_capacity(rows.len());
    for (seq0, ((email, recipient), uid)) in rows.into_iter().zip(uids).enumerate() {
        handles.push(handle_from_row(&email, recipient.as_ref(), (seq0 + 1) as u32, uid));
    }

    Ok(MessageView { handles })
}

fn handle_from_row(email: &Email, recipient: Option<&Recipient>, seq: u32, uid: u32) -> MessageHandle {
    let seen = recipient.map(|r| r.is_read).unwrap_or(true);
    let bits = recipient.map(|r| r.flags).unwrap_or_default();
    MessageHandle {
        email_id: email.id,
        uid,
        seq,
        flags: Flags::new(seen, bits),
        internal_date: email.received_at,
        message_id: email.message_id.clone(),
        subject: email.subject.clone(),
        from_address: email.from_address.clone(),
        from_display_name: email.from_display_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mail_store::UserId;

    fn id(n: u64) -> EmailId {
        EmailId(n)
    }

    #[test]
    fn uid_validity_maps_zero_to_one() {
        assert_eq!(derive_uid_validity(UserId(0)), 1);
    }

    #[test]
    fn sequential_appends_do_not_bump() {
        let mut a = UidAssigner::new(UserId(42));
        let v0 = a.uid_validity();
        let first = a.assign(&[id(1), id(2)]);
        assert_eq!(first, vec![1, 2]);
        let second = a.assign(&[id(1), id(2), id(3)]);
        assert_eq!(second, vec![1, 2, 3]);
        assert_eq!(a.uid_validity(), v0);
    }

    #[test]
    fn backdated_insert_bumps_validity() {
        let mut a = UidAssigner::new(UserId(42));
        let v0 = a.uid_validity();
        a.assign(&[id(1), id(2)]);
        // id(3) now sorts ahead of id(1)/id(2): a backdated receivedAt.
        let after = a.assign(&[id(3), id(1), id(2)]);
        assert_ne!(a.uid_validity(), v0);
        assert_eq!(after, vec![1, 2, 3]);
    }

    #[test]
    fn expunge_renumbers_densely_and_emits_descending() {
        let mut view = MessageView {
            handles: vec![
                handle_from_row(
                    &sample_email(1, 1),
                    None,
                    1,
                    1,
                ),
                handle_from_row(
                    &sample_email(2, 2),
                    None,
                    2,
                    2,
                ),
                handle_from_row(
                    &sample_email(3, 3),
                    None,
                    3,
                    3,
                ),
            ],
        };
        let mut deleted = HashSet::new();
        deleted.insert(2u32);
        let removed = view.remove_by_uids_descending(&deleted);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].seq, 2);
        assert_eq!(view.len(), 2);
        assert_eq!(view.by_seq(1).unwrap().uid, 1);
        assert_eq!(view.by_seq(2).unwrap().uid, 3);
    }

    fn sample_email(n: u64, minute: i64) -> Email {
        Email {
            id: id(n),
            message_id: format!("<{}@x>", n),
            from_address: "a@x".into(),
            from_display_name: "A".into(),
            subject: "s".into(),
            text_body: None,
            html_body: None,
            received_at: Utc::now() + chrono::Duration::minutes(minute),
            in_reply_to: None,
            references: vec![],
            thread_id: None,
            sent_by_user: None,
        }
    }
}
