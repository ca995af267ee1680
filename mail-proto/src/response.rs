//! Responder: pure functions from logical event to wire string, built
//! around a `build().tag(..).message(..).ok()/no()/bad()` builder that
//! returns plain `String` lines written directly through
//! `LineProtocolFramer`.

use crate::capability::CAPABILITY_LINE;
use crate::flags::ALL_FLAGS;

/// Builds one tagged completion response: `<tag> OK|NO|BAD [<code>] <message>`.
#[derive(Default)]
pub struct ResponseBuilder {
    tag: String,
    code: Option<String>,
    message: String,
}

impl ResponseBuilder {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn ok(self) -> String {
        self.finish("OK")
    }

    pub fn no(self) -> String {
        self.finish("NO")
    }

    pub fn bad(self) -> String {
        self.finish("BAD")
    }

    fn finish(self, status: &str) -> String {
        match self.code {
            Some(code) => format!("{} {} [{}] {}", self.tag, status, code, self.message),
            None => format!("{} {} {}", self.tag, status, self.message),
        }
    }
}

pub fn build() -> ResponseBuilder {
    ResponseBuilder::default()
}

pub fn greeting(server_name: &str) -> String {
    format!("* OK {} IMAP4rev2 server ready", server_name)
}

pub fn capability() -> String {
    format!("* CAPABILITY {}", CAPABILITY_LINE)
}

pub fn flags_line() -> String {
    format!("* FLAGS ({})", ALL_FLAGS.join(" "))
}

pub fn permanentflags_line() -> String {
    format!(
        "* OK [PERMANENTFLAGS ({} \\*)] Permanent flags",
        ALL_FLAGS.join(" ")
    )
}

pub fn exists(n: usize) -> String {
    format!("* {} EXISTS", n)
}

pub fn uidvalidity_line(v: u32) -> String {
    format!("* OK [UIDVALIDITY {}] UIDs valid", v)
}

pub fn uidnext_line(n: u32) -> String {
    format!("* OK [UIDNEXT {}] Predicted next UID", n)
}

pub fn list_inbox() -> String {
    "* LIST (\\HasNoChildren) \"/\" \"INBOX\"".to_string()
}

pub fn enabled(tokens: &[String]) -> String {
    format!("* ENABLED {}", tokens.join(" "))
}

pub fn fetch_line(seq: u32, parts: &str) -> String {
    format!("* {} FETCH ({})", seq, parts)
}

pub fn expunge_line(seq: u32) -> String {
    format!("* {} EXPUNGE", seq)
}

pub fn search_line(ids: &[u32]) -> String {
    let joined = ids.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" ");
    format!("* SEARCH {}", joined)
}

pub fn bye(message: &str) -> String {
    format!("* BYE {}", message)
}

pub fn continuation(message: &str) -> String {
    format!("+ {}", message)
}
