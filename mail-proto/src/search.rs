//! SearchEvaluator: flag-only RFC 9051 §6.4.4 criteria
//! over the current MessageView.

use std::collections::HashSet;

use crate::error::SessionError;
use crate::mailbox_view::{MessageHandle, MessageView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    All,
    Seen,
    Unseen,
    Deleted,
    Flagged,
    Unflagged,
}

impl Criterion {
    fn parse_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "ALL" => Some(Self::All),
            "SEEN" => Some(Self::Seen),
            "UNSEEN" => Some(Self::Unseen),
            "DELETED" => Some(Self::Deleted),
            "FLAGGED" => Some(Self::Flagged),
            "UNFLAGGED" => Some(Self::Unflagged),
            _ => None,
        }
    }

    fn matches(&self, handle: &MessageHandle) -> bool {
        match self {
            Self::All => true,
            Self::Seen => handle.flags.seen,
            Self::Unseen => !handle.flags.seen,
            Self::Deleted => handle.flags.bits.deleted,
            Self::Flagged => handle.flags.bits.flagged,
            Self::Unflagged => !handle.flags.bits.flagged,
        }
    }
}

/// Parses space-separated search tokens (case-insensitive, any order).
/// Any token that is not one of the recognized flag criteria is rejected
/// with `BAD` — extended criteria are not supported.
pub fn parse_criteria(raw_args: &str) -> Result<Vec<Criterion>, SessionError> {
    let tokens: Vec<&str> = raw_args.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(SessionError::Parse("SEARCH requires at least one criterion".into()));
    }
    tokens
        .into_iter()
        .map(|t| Criterion::parse_token(t).ok_or_else(|| SessionError::Parse(format!("unsupported search criterion: {}", t))))
        .collect()
}

/// Evaluates `criteria` against every message in `view`, excluding any
/// whose UID is pending deletion unless `DELETED` is explicitly named.
/// Returns sequence numbers (or UIDs, by `by_uid`) of matches in
/// ascending order.
pub fn evaluate(
    view: &MessageView,
    criteria: &[Criterion],
    deleted_uids: &HashSet<u32>,
    by_uid: bool,
) -> Vec<u32> {
    let names_deleted = criteria.contains(&Criterion::Deleted);
    view.iter()
        .filter(|h| names_deleted || !deleted_uids.contains(&h.uid))
        .filter(|h| criteria.iter().all(|c| c.matches(h)))
        .map(|h| if by_uid { h.uid } else { h.seq })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_criteria() {
        assert!(parse_criteria("TEXT foo").is_err());
    }

    #[test]
    fn parses_known_tokens_any_order() {
        let c = parse_criteria("DELETED seen").unwrap();
        assert_eq!(c, vec![Criterion::Deleted, Criterion::Seen]);
    }
}
