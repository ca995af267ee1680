//! Selected-state commands: FETCH, STORE,
//! SEARCH, EXPUNGE, CLOSE, UNSELECT, UID, plus re-SELECT/EXAMINE and the
//! LIST/STATUS commands inherited from Authenticated.

use std::collections::HashSet;
use std::sync::Arc;

use mail_store::{MailboxStore, NotificationBus, User};

use crate::command::authenticated::{self, AuthenticatedContext};
use crate::command::Transition;
use crate::error::SessionError;
use crate::fetch::{self, FetchItem};
use crate::flags::NamedFlags;
use crate::mailbox_view::{MessageView, UidAssigner};
use crate::parser::ParsedCommand;
use crate::{response, search, sequence};

const MAX_DELETED_UIDS: usize = 10_000;

pub struct SelectedContext<'a> {
    pub store: &'a dyn MailboxStore,
    pub notify: &'a Arc<NotificationBus>,
    pub user: &'a User,
    pub uid_assigner: &'a mut UidAssigner,
    pub view: &'a mut MessageView,
    pub read_only: bool,
    pub deleted_uids: &'a mut HashSet<u32>,
}

pub async fn dispatch(
    ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    match cmd.command.as_str() {
        "SELECT" | "EXAMINE" => {
            let actx = AuthenticatedContext {
                store: ctx.store,
                user: ctx.user,
                uid_assigner: ctx.uid_assigner,
            };
            authenticated::dispatch(actx, cmd).await
        }
        "LIST" | "LSUB" => Ok((authenticated::list(&cmd.tag), Transition::None)),
        "STATUS" => {
            let actx = AuthenticatedContext {
                store: ctx.store,
                user: ctx.user,
                uid_assigner: ctx.uid_assigner,
            };
            authenticated::dispatch(actx, cmd).await
        }
        "FETCH" => fetch_cmd(ctx, cmd, false).await,
        "STORE" => store_cmd(ctx, cmd, false).await,
        "SEARCH" => search_cmd(ctx, cmd, false).await,
        "UID" => uid_cmd(ctx, cmd).await,
        "EXPUNGE" => expunge_cmd(ctx, cmd).await,
        "CLOSE" => close_cmd(ctx, cmd).await,
        "UNSELECT" => Ok((
            vec![response::build().tag(&cmd.tag).message("UNSELECT completed").ok()],
            Transition::ToAuthenticatedFromSelected,
        )),
        _ => Ok((super::wrong_state(&cmd.tag), Transition::None)),
    }
}

async fn uid_cmd(
    ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    let Some(sub) = cmd.args.first() else {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Unknown UID subcommand").bad()],
            Transition::None,
        ));
    };
    let sub = sub.to_ascii_uppercase();
    let inner_raw = strip_first_token(&cmd.raw_args);
    let inner = ParsedCommand {
        tag: cmd.tag.clone(),
        command: sub.clone(),
        raw_args: inner_raw,
        args: cmd.args[1..].to_vec(),
    };

    match sub.as_str() {
        "FETCH" => fetch_cmd(ctx, &inner, true).await,
        "STORE" => store_cmd(ctx, &inner, true).await,
        "SEARCH" => search_cmd(ctx, &inner, true).await,
        _ => Ok((
            vec![response::build().tag(&cmd.tag).message("Unknown UID subcommand").bad()],
            Transition::None,
        )),
    }
}

fn strip_first_token(raw: &str) -> String {
    let trimmed = raw.trim_start();
    match trimmed.find(char::is_whitespace) {
        Some(idx) => trimmed[idx..].trim_start().to_string(),
        None => String::new(),
    }
}

async fn fetch_cmd(
    ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
    uid_variant: bool,
) -> Result<(Vec<String>, Transition), SessionError> {
    let Some(set_raw) = cmd.args.first() else {
        return Ok((vec![response::build().tag(&cmd.tag).message("FETCH requires a sequence set").bad()], Transition::None));
    };
    let items_raw = strip_first_token(&cmd.raw_args);
    let item_tokens = parse_item_list(&items_raw);
    let mut items = Vec::new();
    for tok in &item_tokens {
        match FetchItem::parse(tok) {
            Some(item) => items.push(item),
            None => {
                return Ok((
                    vec![response::build().tag(&cmd.tag).message(format!("Unsupported FETCH item: {}", tok)).bad()],
                    Transition::None,
                ))
            }
        }
    }

    let largest = if uid_variant { ctx.view.largest_uid() } else { ctx.view.largest_seq() };
    let resolved = sequence::parse(set_raw, largest)?;

    let mut lines = Vec::new();
    for value in resolved {
        let handle = if uid_variant { ctx.view.by_uid(value) } else { ctx.view.by_seq(value) };
        let Some(handle) = handle.cloned() else { continue };

        let (parts, marks_seen) = fetch::assemble(ctx.store, ctx.user.id, &handle, &items, uid_variant, None).await?;
        lines.push(response::fetch_line(handle.seq, &parts));

        if marks_seen && !ctx.read_only {
            ctx.store.set_recipient_read(handle.email_id, ctx.user.id, true).await?;
            ctx.notify.publish(mail_store::Event::EmailUpdated {
                user_id: ctx.user.id,
                email_id: handle.email_id,
                is_read: true,
            });
            if let Some(h) = ctx.view.by_seq_mut(handle.seq) {
                h.flags.seen = true;
            }
        }
    }
    lines.push(response::build().tag(&cmd.tag).message("FETCH completed").ok());

    Ok((lines, Transition::None))
}

fn parse_item_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(trimmed);
    inner.split_whitespace().map(|s| s.to_string()).collect()
}

async fn store_cmd(
    ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
    uid_variant: bool,
) -> Result<(Vec<String>, Transition), SessionError> {
    if ctx.read_only {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Mailbox is read-only").no()],
            Transition::None,
        ));
    }

    let Some(set_raw) = cmd.args.first() else {
        return Ok((vec![response::build().tag(&cmd.tag).message("STORE requires a sequence set").bad()], Transition::None));
    };
    let Some(item_token) = cmd.args.get(1) else {
        return Ok((vec![response::build().tag(&cmd.tag).message("STORE requires a data item").bad()], Transition::None));
    };

    let item_upper = item_token.to_ascii_uppercase();
    let silent = item_upper.ends_with(".SILENT");
    let mode = item_upper.trim_end_matches(".SILENT");

    let value_raw = {
        let after_set = strip_first_token(&cmd.raw_args);
        strip_first_token(&after_set)
    };
    let named = NamedFlags::parse_raw(&value_raw);

    let largest = if uid_variant { ctx.view.largest_uid() } else { ctx.view.largest_seq() };
    let resolved = sequence::parse(set_raw, largest)?;

    // Resolve every message's new flag set before persisting anything, so a
    // deletedUids overflow discovered partway through aborts the whole
    // command instead of leaving earlier messages mutated.
    let mut planned = Vec::new();
    let mut newly_deleted = HashSet::new();
    for value in &resolved {
        let Some(handle) = (if uid_variant { ctx.view.by_uid(*value) } else { ctx.view.by_seq(*value) }).cloned() else {
            continue;
        };

        let mut flags = handle.flags;
        match mode {
            "FLAGS" => flags.apply_set(&named),
            "+FLAGS" => flags.apply_union(&named),
            "-FLAGS" => flags.apply_difference(&named),
            _ => {
                return Ok((
                    vec![response::build().tag(&cmd.tag).message("Unsupported STORE data item").bad()],
                    Transition::None,
                ))
            }
        }

        if flags.bits.deleted && !ctx.deleted_uids.contains(&handle.uid) {
            newly_deleted.insert(handle.uid);
        }
        planned.push((handle, flags));
    }

    if ctx.deleted_uids.len() + newly_deleted.len() > MAX_DELETED_UIDS {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Maximum deleted messages limit reached").no()],
            Transition::None,
        ));
    }

    let mut lines = Vec::new();
    for (handle, flags) in planned {
        if flags.bits.deleted {
            ctx.deleted_uids.insert(handle.uid);
        } else {
            ctx.deleted_uids.remove(&handle.uid);
        }

        ctx.store.set_recipient_read(handle.email_id, ctx.user.id, flags.seen).await?;
        ctx.store.set_recipient_flags(handle.email_id, ctx.user.id, flags.bits).await?;

        if let Some(h) = ctx.view.by_uid_mut(handle.uid) {
            h.flags = flags;
        }

        if !silent {
            let uid_prefix = if uid_variant { format!("UID {} ", handle.uid) } else { String::new() };
            lines.push(response::fetch_line(handle.seq, &format!("{}FLAGS ({})", uid_prefix, flags.render())));
        }
    }

    lines.push(response::build().tag(&cmd.tag).message("STORE completed").ok());
    Ok((lines, Transition::None))
}

async fn search_cmd(
    ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
    uid_variant: bool,
) -> Result<(Vec<String>, Transition), SessionError> {
    let criteria = match search::parse_criteria(&cmd.raw_args) {
        Ok(c) => c,
        Err(_) => {
            return Ok((
                vec![response::build().tag(&cmd.tag).message("Unsupported search criteria").bad()],
                Transition::None,
            ))
        }
    };

    let ids = search::evaluate(ctx.view, &criteria, ctx.deleted_uids, uid_variant);
    Ok((
        vec![response::search_line(&ids), response::build().tag(&cmd.tag).message("SEARCH completed").ok()],
        Transition::None,
    ))
}

async fn expunge_cmd(
    mut ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    if ctx.read_only {
        return Ok((
            vec![response::build().tag(&cmd.tag).message("Mailbox is read-only").no()],
            Transition::None,
        ));
    }

    let removed = apply_pending_deletions(&mut ctx).await?;
    let mut lines: Vec<String> = removed.iter().map(|h| response::expunge_line(h.seq)).collect();
    lines.push(response::build().tag(&cmd.tag).message("EXPUNGE completed").ok());
    Ok((lines, Transition::None))
}

async fn close_cmd(
    mut ctx: SelectedContext<'_>,
    cmd: &ParsedCommand,
) -> Result<(Vec<String>, Transition), SessionError> {
    if !ctx.read_only {
        apply_pending_deletions(&mut ctx).await?;
    }
    Ok((
        vec![response::build().tag(&cmd.tag).message("CLOSE completed").ok()],
        Transition::ToAuthenticatedFromSelected,
    ))
}

/// Shared by EXPUNGE and CLOSE: deletes the pending UIDs
/// in a single batch and removes them from the MessageView. Returns the
/// removed handles in descending-sequence order for EXPUNGE's emission;
/// CLOSE ignores the return value.
async fn apply_pending_deletions(
    ctx: &mut SelectedContext<'_>,
) -> Result<Vec<crate::mailbox_view::MessageHandle>, SessionError> {
    if ctx.deleted_uids.is_empty() {
        return Ok(Vec::new());
    }

    let email_ids: Vec<_> = ctx
        .deleted_uids
        .iter()
        .filter_map(|uid| ctx.view.by_uid(*uid))
        .map(|h| h.email_id)
        .collect();

    let actually_deleted = ctx.store.apply_deletions(ctx.user.id, &email_ids).await?;
    let deleted_set: HashSet<u64> = actually_deleted.iter().map(|id| id.as_u64()).collect();

    let deleted_uids: HashSet<u32> = ctx
        .view
        .iter()
        .filter(|h| deleted_set.contains(&h.email_id.as_u64()))
        .map(|h| h.uid)
        .collect();

    let removed = ctx.view.remove_by_uids_descending(&deleted_uids);
    ctx.deleted_uids.retain(|uid| !deleted_uids.contains(uid));

    let unread = ctx.store.unread_count(ctx.user.id).await?;
    ctx.notify.publish(mail_store::Event::UnreadCountChanged {
        user_id: ctx.user.id,
        new_count: unread,
    });
    for h in &removed {
        ctx.notify.publish(mail_store::Event::EmailDeleted {
            user_id: ctx.user.id,
            email_id: h.email_id,
        });
    }

    Ok(removed)
}
