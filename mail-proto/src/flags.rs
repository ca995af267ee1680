//! Flag algebra and wire-token rendering: a fixed-order flag bitset with
//! its own wire-token rendering.

use mail_store::FlagBits;

pub const ALL_FLAGS: [&str; 5] = ["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft"];

/// The full IMAP flag bitset for one message: `\Seen` (the per-user
/// `is_read` bit) plus the four bits persisted in `FlagBits`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub seen: bool,
    pub bits: FlagBits,
}

impl Flags {
    pub fn new(seen: bool, bits: FlagBits) -> Self {
        Self { seen, bits }
    }

    /// Space-joined backslash-prefixed tokens in the fixed order of
    /// `ALL_FLAGS`.
    pub fn render(&self) -> String {
        let mut tokens = Vec::new();
        if self.seen {
            tokens.push("\\Seen");
        }
        if self.bits.answered {
            tokens.push("\\Answered");
        }
        if self.bits.flagged {
            tokens.push("\\Flagged");
        }
        if self.bits.deleted {
            tokens.push("\\Deleted");
        }
        if self.bits.draft {
            tokens.push("\\Draft");
        }
        tokens.join(" ")
    }

    pub fn apply_set(&mut self, named: &NamedFlags) {
        self.seen = named.seen;
        self.bits.answered = named.answered;
        self.bits.flagged = named.flagged;
        self.bits.deleted = named.deleted;
        self.bits.draft = named.draft;
    }

    pub fn apply_union(&mut self, named: &NamedFlags) {
        self.seen |= named.seen;
        self.bits.answered |= named.answered;
        self.bits.flagged |= named.flagged;
        self.bits.deleted |= named.deleted;
        self.bits.draft |= named.draft;
    }

    pub fn apply_difference(&mut self, named: &NamedFlags) {
        self.seen &= !named.seen;
        self.bits.answered &= !named.answered;
        self.bits.flagged &= !named.flagged;
        self.bits.deleted &= !named.deleted;
        self.bits.draft &= !named.draft;
    }
}

/// A STORE data item value: whichever of the five known flag tokens were
/// named, found anywhere in the remaining raw argument, order-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedFlags {
    pub seen: bool,
    pub answered: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub draft: bool,
}

impl NamedFlags {
    pub fn parse_raw(raw: &str) -> Self {
        let lower = raw.to_ascii_lowercase();
        NamedFlags {
            seen: lower.contains("\\seen"),
            answered: lower.contains("\\answered"),
            flagged: lower.contains("\\flagged"),
            deleted: lower.contains("\\deleted"),
            draft: lower.contains("\\draft"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_fixed_order() {
        let f = Flags::new(
            true,
            FlagBits {
                answered: false,
                flagged: true,
                deleted: false,
                draft: false,
            },
        );
        assert_eq!(f.render(), "\\Seen \\Flagged");
    }

    #[test]
    fn named_flags_parse_is_order_insensitive() {
        let n = NamedFlags::parse_raw("(\\Deleted \\Seen)");
        assert!(n.deleted && n.seen && !n.flagged);
    }

    #[test]
    fn union_and_difference() {
        let mut f = Flags::default();
        f.apply_union(&NamedFlags {
            deleted: true,
            ..Default::default()
        });
        assert!(f.bits.deleted);
        f.apply_difference(&NamedFlags {
            deleted: true,
            ..Default::default()
        });
        assert!(!f.bits.deleted);
    }
}
