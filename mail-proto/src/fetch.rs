//! FetchAssembler: builds the space-joined FETCH data-item list for one
//! resolved message by walking a requested attribute list, in a fixed
//! evaluation order, against a loaded message.

use mail_store::MailboxStore;

use crate::error::SessionError;
use crate::mailbox_view::MessageHandle;

/// One requested FETCH data item, in the fixed assembly order of this
/// engine: UID, FLAGS, INTERNALDATE, RFC822.SIZE, ENVELOPE, BODY variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItem {
    Uid,
    Flags,
    InternalDate,
    Rfc822Size,
    Envelope,
    Body,
    BodyPeek,
    BodyHeader,
    BodyPeekHeader,
}

impl FetchItem {
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "UID" => Some(Self::Uid),
            "FLAGS" => Some(Self::Flags),
            "INTERNALDATE" => Some(Self::InternalDate),
            "RFC822.SIZE" => Some(Self::Rfc822Size),
            "ENVELOPE" => Some(Self::Envelope),
            "BODY[]" | "RFC822" => Some(Self::Body),
            "BODY.PEEK[]" => Some(Self::BodyPeek),
            "BODY[HEADER]" => Some(Self::BodyHeader),
            "BODY.PEEK[HEADER]" => Some(Self::BodyPeekHeader),
            _ => None,
        }
    }

    /// Whether fetching this item sets `\Seen` and must be persisted:
    /// true for any non-`PEEK` body retrieval.
    pub fn mutates_seen(&self) -> bool {
        matches!(self, Self::Body | Self::BodyHeader)
    }
}

/// `"dd-MMM-yyyy HH:mm:ss +ZZZZ"`, fixed-culture month abbreviation.
pub fn format_internal_date(dt: chrono::DateTime<chrono::Utc>) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    use chrono::Datelike;
    use chrono::Timelike;
    format!(
        "\"{:02}-{}-{:04} {:02}:{:02}:{:02} +0000\"",
        dt.day(),
        MONTHS[dt.month0() as usize],
        dt.year(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )
}

fn escape_envelope_string(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// RFC 9051 `(personal at-domain-list mailbox host)` address form. `sender`
/// and `reply-to` default to the `from` list when not distinct; this engine only ever has one address, so the address list is
/// always a single-element list.
fn render_address_list(display_name: &str, address: &str) -> String {
    let (mailbox, host) = address.split_once('@').unwrap_or((address, ""));
    format!(
        "(({} NIL {} {}))",
        escape_envelope_string(display_name),
        escape_envelope_string(mailbox),
        escape_envelope_string(host),
    )
}

fn nil_or(s: Option<&str>) -> String {
    match s {
        Some(v) if !v.is_empty() => escape_envelope_string(v),
        _ => "NIL".to_string(),
    }
}

pub fn render_envelope(handle: &MessageHandle, in_reply_to: Option<&str>) -> String {
    let date = escape_envelope_string(&handle.internal_date.to_rfc2822());
    let subject = nil_or(Some(&handle.subject));
    let from = render_address_list(&handle.from_display_name, &handle.from_address);
    let sender = from.clone();
    let reply_to = from.clone();
    let to = "NIL";
    let cc = "NIL";
    let bcc = "NIL";
    let in_reply_to = nil_or(in_reply_to);
    let message_id = escape_envelope_string(&handle.message_id);

    format!(
        "({} {} {} {} {} {} {} {} {} {})",
        date, subject, from, sender, reply_to, to, cc, bcc, in_reply_to, message_id
    )
}

/// Assembles the space-joined parts of `* <seq> FETCH (<parts>)` for one
/// message. Returns the rendered parts and whether `\Seen` must now be
/// persisted.
pub async fn assemble(
    store: &dyn MailboxStore,
    user_id: mail_store::UserId,
    handle: &MessageHandle,
    items: &[FetchItem],
    uid_variant: bool,
    in_reply_to: Option<&str>,
) -> Result<(String, bool), SessionError> {
    let mut parts = Vec::new();
    let mut marks_seen = false;

    if uid_variant || items.contains(&FetchItem::Uid) {
        parts.push(format!("UID {}", handle.uid));
    }

    for item in items {
        match item {
            FetchItem::Uid => {}
            FetchItem::Flags => parts.push(format!("FLAGS ({})", handle.flags.render())),
            FetchItem::InternalDate => {
                parts.push(format!("INTERNALDATE {}", format_internal_date(handle.internal_date)))
            }
            FetchItem::Rfc822Size => {
                let size = store.email_size_bytes(handle.email_id).await?;
                parts.push(format!("RFC822.SIZE {}", size));
            }
            FetchItem::Envelope => parts.push(format!("ENVELOPE {}", render_envelope(handle, in_reply_to))),
            FetchItem::Body | FetchItem::BodyPeek => {
                let bytes = store.render_email(handle.email_id, user_id).await?;
                let label = if matches!(item, FetchItem::Body) { "BODY[]" } else { "BODY.PEEK[]" };
                parts.push(format!("{} {{{}}}\r\n{}", label, bytes.len(), String::from_utf8_lossy(&bytes)));
                if matches!(item, FetchItem::Body) {
                    marks_seen = true;
                }
            }
            FetchItem::BodyHeader | FetchItem::BodyPeekHeader => {
                let bytes = store.render_email(handle.email_id, user_id).await?;
                let header = header_only(&bytes);
                let label = if matches!(item, FetchItem::BodyHeader) {
                    "BODY[HEADER]"
                } else {
                    "BODY.PEEK[HEADER]"
                };
                parts.push(format!("{} {{{}}}\r\n{}", label, header.len(), String::from_utf8_lossy(&header)));
                if matches!(item, FetchItem::BodyHeader) {
                    marks_seen = true;
                }
            }
        }
    }

    Ok((parts.join(" "), marks_seen))
}

fn header_only(message: &[u8]) -> Vec<u8> {
    let sep = b"\r\n\r\n";
    match message.windows(sep.len()).position(|w| w == sep) {
        Some(idx) => message[..idx + 2].to_vec(),
        None => message.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_items() {
        assert_eq!(FetchItem::parse("flags"), Some(FetchItem::Flags));
        assert_eq!(FetchItem::parse("BODY.PEEK[]"), Some(FetchItem::BodyPeek));
        assert_eq!(FetchItem::parse("BOGUS"), None);
    }

    #[test]
    fn non_peek_body_mutates_seen() {
        assert!(FetchItem::Body.mutates_seen());
        assert!(!FetchItem::BodyPeek.mutates_seen());
    }

    #[test]
    fn header_only_stops_at_blank_line() {
        let msg = b"Subject: x\r\n\r\nbody text";
        let h = header_only(msg);
        assert_eq!(h, b"Subject: x\r\n\r\n");
    }
}
