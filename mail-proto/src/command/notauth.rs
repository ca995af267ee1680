//! NotAuthenticated-state commands: LOGIN and
//! AUTHENTICATE PLAIN.

use std::sync::Arc;

use mail_store::{MailboxStore, Scope};
use mail_user::{ConnectionRegistry, CredentialVault};

use crate::command::Transition;
use crate::error::SessionError;
use crate::parser::ParsedCommand;
use crate::{response, sasl};

pub struct NotAuthContext<'a> {
    pub store: &'a dyn MailboxStore,
    pub vault: &'a CredentialVault,
    pub registry: &'a Arc<ConnectionRegistry>,
    pub connection_cap: u32,
}

pub async fn dispatch(
    ctx: NotAuthContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    match cmd.command.as_str() {
        "LOGIN" => login(ctx, cmd).await,
        "AUTHENTICATE" => authenticate(ctx, cmd).await,
        _ => Ok((
            vec![response::build().tag(&cmd.tag).message("Not authenticated").bad()],
            Transition::None,
        )),
    }
}

async fn login(
    ctx: NotAuthContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    if cmd.args.len() != 2 {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("LOGIN requires a user and password").bad()],
            Transition::None,
        ));
    }
    complete_login(ctx, &cmd.tag, "LOGIN", &cmd.args[0], &cmd.args[1]).await
}

async fn authenticate(
    ctx: NotAuthContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    let mechanism = cmd.args.first().map(|s| s.to_ascii_uppercase());
    if mechanism.as_deref() != Some("PLAIN") {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Unsupported authentication mechanism").no()],
            Transition::None,
        ));
    }

    match cmd.args.get(1) {
        Some(initial_response) => finish_authenticate_plain(ctx, &cmd.tag, initial_response).await,
        None => Ok((vec![response::continuation("")], Transition::AwaitSaslContinuation)),
    }
}

/// Resumes an AUTHENTICATE PLAIN exchange after the continuation line was
/// read by the caller. The cancellation token `*` returns `BAD
/// Authentication cancelled`.
pub async fn finish_authenticate_plain(
    ctx: NotAuthContext<'_>,
    tag: &str,
    line: &str,
) -> Result<(Vec<String>, Transition), SessionError> {
    if line.trim() == "*" {
        return Ok((
            vec![response::build().tag(tag).message("Authentication cancelled").bad()],
            Transition::None,
        ));
    }

    let creds = match sasl::decode_plain(line.trim()) {
        Ok(c) => c,
        Err(_) => {
            return Ok((
                vec![response::build().tag(tag).message("Authentication failed").no()],
                Transition::None,
            ))
        }
    };

    complete_login(ctx, tag, "AUTHENTICATE", &creds.authcid, &creds.password).await
}

async fn complete_login(
    ctx: NotAuthContext<'_>,
    tag: &str,
    command_name: &str,
    address: &str,
    password: &str,
) -> Result<(Vec<String>, Transition), SessionError> {
    let identity = match ctx.vault.verify(address, password, Scope::Imap).await {
        Ok(identity) => identity,
        Err(_) => {
            return Ok((
                vec![response::build().tag(tag).message("Authentication failed").no()],
                Transition::None,
            ))
        }
    };

    if !ctx.registry.try_add(identity.user_id, ctx.connection_cap) {
        return Ok((
            vec![response::build().tag(tag).message("Too many connections").no()],
            Transition::None,
        ));
    }

    let user = match ctx.store.find_user(identity.user_id).await {
        Ok(user) => user,
        Err(e) => {
            ctx.registry.remove(identity.user_id);
            return Err(e.into());
        }
    };

    Ok((
        vec![
            response::capability(),
            response::build().tag(tag).message(format!("{} completed", command_name)).ok(),
        ],
        Transition::ToAuthenticated { user, identity },
    ))
}
