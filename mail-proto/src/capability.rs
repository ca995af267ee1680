//! Advertised capability line and the `ENABLE` token set: a small,
//! mostly-static capability surface.

pub const CAPABILITY_LINE: &str =
    "IMAP4rev2 AUTH=PLAIN LITERAL+ ENABLE UNSELECT UIDPLUS CHILDREN";

/// Only `UTF8=ACCEPT` is honored; every other token is silently ignored.
pub fn accepted_enable_tokens(requested: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|t| t.eq_ignore_ascii_case("UTF8=ACCEPT"))
        .cloned()
        .collect()
}
