//! Per-state command dispatch tables: a handler table keyed by
//! `(state, commandName)`.

pub mod authenticated;
pub mod notauth;
pub mod selected;

use mail_store::User;
use mail_user::VerifiedIdentity;

use crate::mailbox_view::{MessageView, UidAssigner};

/// What the SessionEngine must do to `Session::state` after a command
/// handler returns.
pub enum Transition {
    None,
    ToAuthenticated {
        user: User,
        identity: VerifiedIdentity,
    },
    ToSelected {
        read_only: bool,
        view: MessageView,
        uid_assigner: UidAssigner,
    },
    ToAuthenticatedFromSelected,
    AwaitSaslContinuation,
    Logout,
}

/// CAPABILITY, NOOP, LOGOUT: legal in any state.
pub fn capability_lines(tag: &str) -> Vec<String> {
    vec![
        crate::response::capability(),
        crate::response::build().tag(tag).message("CAPABILITY completed").ok(),
    ]
}

pub fn noop_lines(tag: &str) -> Vec<String> {
    vec![crate::response::build().tag(tag).message("NOOP completed").ok()]
}

pub fn logout_lines(tag: &str) -> Vec<String> {
    vec![
        crate::response::bye("Logging out"),
        crate::response::build().tag(tag).message("LOGOUT completed").ok(),
    ]
}

pub fn wrong_state(tag: &str) -> Vec<String> {
    vec![crate::response::build()
        .tag(tag)
        .message("Command not valid in this state")
        .bad()]
}
