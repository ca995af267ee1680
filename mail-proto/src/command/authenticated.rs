//! Authenticated-state commands: SELECT, EXAMINE,
//! LIST, STATUS.

use mail_store::{MailboxStore, User};

use crate::command::Transition;
use crate::error::SessionError;
use crate::mailbox_view::{self, UidAssigner};
use crate::parser::ParsedCommand;
use crate::response;

pub struct AuthenticatedContext<'a> {
    pub store: &'a dyn MailboxStore,
    pub user: &'a User,
    pub uid_assigner: &'a mut UidAssigner,
}

pub async fn dispatch(
    ctx: AuthenticatedContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    match cmd.command.as_str() {
        "SELECT" => select_or_examine(ctx, cmd, false).await,
        "EXAMINE" => select_or_examine(ctx, cmd, true).await,
        "LIST" | "LSUB" => Ok((list(&cmd.tag), Transition::None)),
        "STATUS" => status(ctx, cmd).await,
        _ => Ok((super::wrong_state(&cmd.tag), Transition::None)),
    }
}

pub fn list(tag: &str) -> Vec<String> {
    vec![response::list_inbox(), response::build().tag(tag).message("LIST completed").ok()]
}

async fn select_or_examine(
    ctx: AuthenticatedContext<'_>,
    cmd: &ParsedCommand,
    read_only: bool,
) -> Result<(Vec<String>, Transition), SessionError> {
    let mailbox = cmd.args.first().map(|s| s.as_str()).unwrap_or("");
    if !mailbox.eq_ignore_ascii_case("INBOX") {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Mailbox does not exist").no()],
            Transition::None,
        ));
    }

    let view = mailbox_view::load(ctx.store, ctx.user, ctx.uid_assigner).await?;
    let command_name = if read_only { "EXAMINE" } else { "SELECT" };
    let mode_code = if read_only { "READ-ONLY" } else { "READ-WRITE" };

    let mut lines = vec![
        response::flags_line(),
        response::permanentflags_line(),
        response::exists(view.len()),
        response::uidvalidity_line(ctx.uid_assigner.uid_validity()),
        response::uidnext_line(view.uid_next()),
    ];
    lines.push(
        response::build()
            .tag(&cmd.tag)
            .code(mode_code)
            .message(format!("{} completed", command_name))
            .ok(),
    );

    Ok((
        lines,
        Transition::ToSelected {
            read_only,
            view,
            uid_assigner: std::mem::replace(ctx.uid_assigner, UidAssigner::new(ctx.user.id)),
        },
    ))
}

async fn status(
    ctx: AuthenticatedContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    let mailbox = cmd.args.first().map(|s| s.as_str()).unwrap_or("");
    if !mailbox.eq_ignore_ascii_case("INBOX") {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Mailbox does not exist").no()],
            Transition::None,
        ));
    }

    let view = mailbox_view::load(ctx.store, ctx.user, ctx.uid_assigner).await?;
    let unseen = ctx.store.unread_count(ctx.user.id).await?;

    let requested = cmd.raw_args.to_ascii_uppercase();
    let mut items = Vec::new();
    if requested.contains("MESSAGES") {
        items.push(format!("MESSAGES {}", view.len()));
    }
    if requested.contains("UNSEEN") {
        items.push(format!("UNSEEN {}", unseen));
    }
    if requested.contains("UIDNEXT") {
        items.push(format!("UIDNEXT {}", view.uid_next()));
    }
    if requested.contains("UIDVALIDITY") {
        items.push(format!("UIDVALIDITY {}", ctx.uid_assigner.uid_validity()));
    }

    Ok((
        vec![
            format!("* STATUS INBOX ({})", items.join(" ")),
            response::build().tag(&cmd.tag).message("STATUS completed").ok(),
        ],
        Transition::None,
    ))
}
