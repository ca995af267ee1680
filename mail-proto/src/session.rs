//! SessionEngine: the per-connection IMAP state machine, dispatching by
//! current state across four states (no IDLE). Produces `EngineOutput`
//! rather than a typed response/idle pair, since the engine owns its own
//! `LineProtocolFramer` and writes wire lines directly.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mail_store::{MailboxStore, NotificationBus, User};
use mail_user::{ConnectionRegistry, CredentialVault, VerifiedIdentity};

use crate::command::authenticated::AuthenticatedContext;
use crate::command::notauth::{self, NotAuthContext};
use crate::command::selected::SelectedContext;
use crate::command::{self, Transition};
use crate::error::SessionError;
use crate::mailbox_view::{MessageView, UidAssigner};
use crate::parser::{self, ParsedCommand};
use crate::response;

/// The four session states. `AwaitingSaslContinuation` is not one of
/// them; it is engine bookkeeping for the single command (AUTHENTICATE
/// PLAIN without an initial response) that needs a follow-up read.
enum SessionState {
    NotAuthenticated,
    Authenticated {
        user: User,
        identity: VerifiedIdentity,
        uid_assigner: UidAssigner,
    },
    Selected {
        user: User,
        identity: VerifiedIdentity,
        uid_assigner: UidAssigner,
        view: MessageView,
        read_only: bool,
        deleted_uids: HashSet<u32>,
    },
    Logout,
}

/// What the connection loop in `mailcore` should do after one line is
/// handled.
pub enum EngineOutput {
    Lines(Vec<String>),
    /// The engine needs one more line (the AUTHENTICATE PLAIN
    /// continuation); the caller must write `lines` first, then read a
    /// line bounded by the same 8192-byte limit and call
    /// `handle_continuation`.
    AwaitContinuation { lines: Vec<String> },
    /// `lines` must be flushed, then the connection closed.
    Close { lines: Vec<String> },
}

pub struct SessionEngine {
    store: Arc<dyn MailboxStore>,
    vault: Arc<CredentialVault>,
    registry: Arc<ConnectionRegistry>,
    notify: Arc<NotificationBus>,
    server_name: String,
    connection_cap: u32,
    connection_id: u64,
    client_ip: IpAddr,
    state: SessionState,
    enabled_capabilities: HashSet<String>,
    awaiting_sasl: bool,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionEngine {
    pub fn new(
        store: Arc<dyn MailboxStore>,
        vault: Arc<CredentialVault>,
        registry: Arc<ConnectionRegistry>,
        notify: Arc<NotificationBus>,
        server_name: String,
        connection_cap: u32,
        connection_id: u64,
        client_ip: IpAddr,
    ) -> Self {
        Self {
            store,
            vault,
            registry,
            notify,
            server_name,
            connection_cap,
            connection_id,
            client_ip,
            state: SessionState::NotAuthenticated,
            enabled_capabilities: HashSet::new(),
            awaiting_sasl: false,
            last_activity_at: Utc::now(),
        }
    }

    pub fn greeting(&self) -> String {
        response::greeting(&self.server_name)
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    fn user_id_for_registry(&self) -> Option<mail_store::UserId> {
        match &self.state {
            SessionState::Authenticated { identity, .. } => Some(identity.user_id),
            SessionState::Selected { identity, .. } => Some(identity.user_id),
            _ => None,
        }
    }

    /// Releases this session's ConnectionRegistry slot, if any. Must be
    /// called by the connection loop on every exit path: normal LOGOUT,
    /// transport error, or cancellation.
    pub fn release_registry_slot(&self) {
        if let Some(user_id) = self.user_id_for_registry() {
            self.registry.remove(user_id);
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<EngineOutput, SessionError> {
        self.last_activity_at = Utc::now();

        if self.awaiting_sasl {
            return self.handle_continuation(line).await;
        }

        let cmd = parser::parse_line(line)?;

        if let Some(lines) = self.try_any_state(&cmd) {
            return self.finish(lines, Transition::None, matches!(cmd.command.as_str(), "LOGOUT")).await;
        }

        let (lines, transition) = self.dispatch(&cmd).await?;
        let logging_out = matches!(transition, Transition::Logout);
        self.finish(lines, transition, logging_out).await
    }

    /// Resumes an AUTHENTICATE PLAIN exchange.
    async fn handle_continuation(&mut self, line: &str) -> Result<EngineOutput, SessionError> {
        self.awaiting_sasl = false;
        let ctx = NotAuthContext {
            store: self.store.as_ref(),
            vault: &self.vault,
            registry: &self.registry,
            connection_cap: self.connection_cap,
        };
        let (lines, transition) = notauth::finish_authenticate_plain(ctx, "*", line).await?;
        self.finish(lines, transition, false).await
    }

    fn try_any_state(&mut self, cmd: &ParsedCommand) -> Option<Vec<String>> {
        match cmd.command.as_str() {
            "CAPABILITY" => Some(command::capability_lines(&cmd.tag)),
            "NOOP" => Some(command::noop_lines(&cmd.tag)),
            "LOGOUT" => Some(command::logout_lines(&cmd.tag)),
            "ENABLE" => {
                let accepted = crate::capability::accepted_enable_tokens(&cmd.args);
                for tok in &accepted {
                    self.enabled_capabilities.insert(tok.clone());
                }
                let mut lines = Vec::new();
                if !accepted.is_empty() {
                    lines.push(response::enabled(&accepted));
                }
                lines.push(response::build().tag(&cmd.tag).message("ENABLE completed").ok());
                Some(lines)
            }
            _ => None,
        }
    }

    async fn dispatch(&mut self, cmd: &ParsedCommand) -> Result<(Vec<String>, Transition), SessionError> {
        match &mut self.state {
            SessionState::NotAuthenticated => {
                let ctx = NotAuthContext {
                    store: self.store.as_ref(),
                    vault: &self.vault,
                    registry: &self.registry,
                    connection_cap: self.connection_cap,
                };
                notauth::dispatch(ctx, cmd).await
            }
            SessionState::Authenticated { user, uid_assigner, .. } => {
                let ctx = AuthenticatedContext {
                    store: self.store.as_ref(),
                    user,
                    uid_assigner,
                };
                command::authenticated::dispatch(ctx, cmd).await
            }
            SessionState::Selected {
                user,
                uid_assigner,
                view,
                read_only,
                deleted_uids,
                ..
            } => {
                let ctx = SelectedContext {
                    store: self.store.as_ref(),
                    notify: &self.notify,
                    user,
                    uid_assigner,
                    view,
                    read_only: *read_only,
                    deleted_uids,
                };
                command::selected::dispatch(ctx, cmd).await
            }
            SessionState::Logout => Ok((
                vec![response::build().tag(&cmd.tag).message("No commands are allowed in the LOGOUT state.").bad()],
                Transition::None,
            )),
        }
    }

    async fn finish(
        &mut self,
        lines: Vec<String>,
        transition: Transition,
        logging_out: bool,
    ) -> Result<EngineOutput, SessionError> {
        match transition {
            Transition::None => {}
            Transition::AwaitSaslContinuation => {
                self.awaiting_sasl = true;
                return Ok(EngineOutput::AwaitContinuation { lines });
            }
            Transition::ToAuthenticated { user, identity } => {
                self.state = SessionState::Authenticated {
                    uid_assigner: UidAssigner::new(identity.user_id),
                    user,
                    identity,
                };
            }
            Transition::ToSelected { read_only, view, uid_assigner } => {
                let (user, identity) = match std::mem::replace(&mut self.state, SessionState::Logout) {
                    SessionState::Authenticated { user, identity, .. } => (user, identity),
                    SessionState::Selected { user, identity, .. } => (user, identity),
                    other => {
                        self.state = other;
                        return Err(SessionError::ProtocolState("SELECT transition from invalid state".into()));
                    }
                };
                self.state = SessionState::Selected {
                    user,
                    identity,
                    uid_assigner,
                    view,
                    read_only,
                    deleted_uids: HashSet::new(),
                };
            }
            Transition::ToAuthenticatedFromSelected => {
                let (user, identity, uid_assigner) = match std::mem::replace(&mut self.state, SessionState::Logout) {
                    SessionState::Selected { user, identity, uid_assigner, .. } => (user, identity, uid_assigner),
                    other => {
                        self.state = other;
                        return Err(SessionError::ProtocolState("UNSELECT/CLOSE from invalid state".into()));
                    }
                };
                self.state = SessionState::Authenticated { user, identity, uid_assigner };
            }
            Transition::Logout => {
                self.release_registry_slot();
                self.state = SessionState::Logout;
            }
        }

        if logging_out {
            self.release_registry_slot();
            self.state = SessionState::Logout;
            return Ok(EngineOutput::Close { lines });
        }

        Ok(EngineOutput::Lines(lines))
    }
}
