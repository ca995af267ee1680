//! RFC 5322 serialization of a stored email, consumed by
//! `mail-proto`'s FetchAssembler for `BODY[]`/`RFC822`.

use crate::entities::{Attachment, Email, Recipient, RecipientType};

const BOUNDARY: &str = "mailcore-boundary";

/// Byte-exact RFC 5322 message: header order is Message-ID, From,
/// To/Cc/Bcc, Subject, Date, then the body. Bcc is included only when
/// `include_bcc` (the requesting user is the sender) is true — never
/// leaked to other recipients.
pub fn render_rfc5322(
    email: &Email,
    recipients: &[Recipient],
    attachments: &[Attachment],
    include_bcc: bool,
) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&format!("Message-ID: {}\r\n", email.message_id));
    out.push_str(&format!(
        "From: \"{}\" <{}>\r\n",
        escape_header(&email.from_display_name),
        email.from_address
    ));

    write_address_list(&mut out, "To", recipients, RecipientType::To);
    write_address_list(&mut out, "Cc", recipients, RecipientType::Cc);
    if include_bcc {
        write_address_list(&mut out, "Bcc", recipients, RecipientType::Bcc);
    }

    out.push_str(&format!("Subject: {}\r\n", email.subject));
    out.push_str(&format!(
        "Date: {}\r\n",
        email.received_at.to_rfc2822()
    ));

    let has_text = email.text_body.is_some();
    let has_html = email.html_body.is_some();
    let multipart = (has_text && has_html) || !attachments.is_empty();

    if multipart {
        out.push_str(&format!(
            "Content-Type: multipart/alternative; boundary=\"{}\"\r\n\r\n",
            BOUNDARY
        ));
        if let Some(text) = &email.text_body {
            out.push_str(&format!("--{}\r\n", BOUNDARY));
            out.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            out.push_str(&escape_from_lines(text));
            out.push_str("\r\n");
        }
        if let Some(html) = &email.html_body {
            out.push_str(&format!("--{}\r\n", BOUNDARY));
            out.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
            out.push_str(&escape_from_lines(html));
            out.push_str("\r\n");
        }
        for a in attachments {
            out.push_str(&format!("--{}\r\n", BOUNDARY));
            out.push_str(&format!(
                "Content-Type: {}; name=\"{}\"\r\n",
                a.content_type, a.filename
            ));
            out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
            out.push_str(&base64_wrap(&a.bytes));
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{}--\r\n", BOUNDARY));
    } else if let Some(text) = &email.text_body {
        out.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
        out.push_str(&escape_from_lines(text));
    } else if let Some(html) = &email.html_body {
        out.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
        out.push_str(&escape_from_lines(html));
    } else {
        out.push_str("\r\n");
    }

    out.into_bytes()
}

fn write_address_list(out: &mut String, header: &str, recipients: &[Recipient], kind: RecipientType) {
    let addrs: Vec<String> = recipients
        .iter()
        .filter(|r| r.kind == kind)
        .map(|r| format!("\"{}\" <{}>", escape_header(&r.display_name), r.address))
        .collect();
    if !addrs.is_empty() {
        out.push_str(&format!("{}: {}\r\n", header, addrs.join(", ")));
    }
}

fn escape_header(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Escape lines beginning `From ` to `>From ` (mbox dot-stuffing analog,
/// shared with MBOX export).
fn escape_from_lines(body: &str) -> String {
    body.lines()
        .map(|line| {
            if line.starts_with("From ") {
                format!(">{}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn base64_wrap(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let encoded = STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EmailId, UserId};
    use chrono::Utc;

    fn sample_email() -> Email {
        Email {
            id: EmailId(1),
            message_id: "<abc@example.com>".into(),
            from_address: "bob@example.com".into(),
            from_display_name: "Bob".into(),
            subject: "Hello".into(),
            text_body: Some("Hi there\r\nFrom me".into()),
            html_body: None,
            received_at: Utc::now(),
            in_reply_to: None,
            references: vec![],
            thread_id: None,
            sent_by_user: Some(UserId(2)),
        }
    }

    #[test]
    fn renders_headers_in_order() {
        let email = sample_email();
        let recipients = vec![Recipient {
            email_id: email.id,
            address: "alice@example.com".into(),
            display_name: "Alice".into(),
            kind: RecipientType::To,
            user_id: Some(UserId(1)),
            is_read: false,
            flags: Default::default(),
        }];
        let rendered = render_rfc5322(&email, &recipients, &[], false);
        let text = String::from_utf8(rendered).unwrap();
        let message_id_pos = text.find("Message-ID:").unwrap();
        let from_pos = text.find("From:").unwrap();
        let to_pos = text.find("To:").unwrap();
        let subject_pos = text.find("Subject:").unwrap();
        let date_pos = text.find("Date:").unwrap();
        assert!(message_id_pos < from_pos);
        assert!(from_pos < to_pos);
        assert!(to_pos < subject_pos);
        assert!(subject_pos < date_pos);
    }

    #[test]
    fn bcc_only_included_for_sender() {
        let email = sample_email();
        let recipients = vec![Recipient {
            email_id: email.id,
            address: "eve@example.com".into(),
            display_name: "Eve".into(),
            kind: RecipientType::Bcc,
            user_id: None,
            is_read: false,
            flags: Default::default(),
        }];
        let for_sender = render_rfc5322(&email, &recipients, &[], true);
        let for_other = render_rfc5322(&email, &recipients, &[], false);
        assert!(String::from_utf8(for_sender).unwrap().contains("Bcc:"));
        assert!(!String::from_utf8(for_other).unwrap().contains("Bcc:"));
    }

    #[test]
    fn escapes_from_lines_in_body() {
        let email = sample_email();
        let rendered = render_rfc5322(&email, &[], &[], false);
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains(">From me"));
    }
}
