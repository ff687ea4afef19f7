/// Chat mode: entry from the shell plus the `/`-prefixed sub-commands.

use colored::Colorize;
use termsh_core::models::RoomType;
use termsh_core::{GameError, Result};

use crate::dispatch::CommandOutcome;
use crate::session::ShellSession;
use crate::style;

pub async fn enter(_sess: &mut ShellSession, args: &[String]) -> Result<CommandOutcome> {
    let split = args.iter().any(|a| a == "--split");
    Ok(CommandOutcome::EnterChat { split })
}

/// Handle one `/command` line inside chat mode. `Ok(None)` means nothing to
/// print.
pub async fn chat_command(
    sess: &mut ShellSession,
    cmd: &str,
    args: &[String],
) -> Result<Option<String>> {
    match cmd {
        "create" => create(sess, args).await,
        "join" => join(sess, args).await,
        "leave" => leave(sess, args).await,
        "invite" => invite(sess, args).await,
        "rooms" => rooms(sess).await,
        "who" => who(sess).await,
        "history" => history(sess, args).await,
        "help" => Ok(Some(help_text())),
        other => Err(GameError::invalid(format!("/{}: unknown chat command", other))),
    }
}

fn help_text() -> String {
    let mut out = style::heading("Chat commands");
    for (cmd, what) in [
        ("/create <name> [--private | --password <pw>]", "create a room"),
        ("/join <name> [password]", "join a room (becomes your active tab)"),
        ("/leave [name]", "leave a room"),
        ("/invite <user>", "invite a user into the active room"),
        ("/rooms", "list rooms"),
        ("/who", "members of the active room"),
        ("/history [n]", "replay recent messages"),
        (":exit / Esc / Ctrl+Q", "back to the shell"),
    ] {
        out.push_str(&format!("  {:<42} {}{}", cmd.bright_cyan(), what, style::NEWLINE));
    }
    out
}

async fn create(sess: &mut ShellSession, args: &[String]) -> Result<Option<String>> {
    let name = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: /create <name> [--private | --password <pw>]"))?
        .clone();
    let mut room_type = RoomType::Public;
    let mut password = None;
    let mut rest = args[1..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--private" => room_type = RoomType::Private,
            "--password" => {
                room_type = RoomType::Password;
                password = rest.next().cloned();
            }
            other => return Err(GameError::invalid(format!("unknown flag {}", other))),
        }
    }
    let room = sess
        .ctx
        .chat
        .create_room(&name, room_type, password.as_deref(), &sess.user.id)
        .await?;
    sess.set_chat_room(Some(room.name.clone()));
    Ok(Some(style::ok_line(&format!(
        "Created {} ({}) — it is now your active room",
        room.name,
        room.room_type.tag()
    ))))
}

async fn join(sess: &mut ShellSession, args: &[String]) -> Result<Option<String>> {
    let name = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: /join <name> [password]"))?;
    let password = args.get(1).map(String::as_str);
    let room = sess.ctx.chat.join_room(name, &sess.user.id, password).await?;
    sess.set_chat_room(Some(room.name.clone()));

    let mut out = style::ok_line(&format!("Joined {}", room.name));
    let recent = sess.ctx.chat.history(&room.name, &sess.user.id, 10).await?;
    for message in recent {
        out.push_str(&style::chat_line(&message.username, &message.content));
    }
    Ok(Some(out))
}

async fn leave(sess: &mut ShellSession, args: &[String]) -> Result<Option<String>> {
    let name = match args.first() {
        Some(name) => name.clone(),
        None => sess
            .current_chat_room()
            .ok_or_else(|| GameError::invalid("usage: /leave <name> (no active room)"))?,
    };
    sess.ctx.chat.leave_room(&name, &sess.user.id).await?;
    if sess.current_chat_room().as_deref() == Some(name.as_str()) {
        sess.set_chat_room(None);
    }
    Ok(Some(style::ok_line(&format!("Left {}", name))))
}

async fn invite(sess: &mut ShellSession, args: &[String]) -> Result<Option<String>> {
    let username = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: /invite <user>"))?;
    let room = sess
        .current_chat_room()
        .ok_or_else(|| GameError::invalid("join a room before inviting"))?;
    let invitee = sess
        .ctx
        .users
        .get_by_name(username)
        .await?
        .ok_or_else(|| GameError::not_found(format!("user {}", username)))?;
    sess.ctx
        .chat
        .invite_user(&room, &sess.user.id, &sess.user.username, &invitee.id)
        .await?;
    Ok(Some(style::ok_line(&format!("{} invited to {}", username, room))))
}

async fn rooms(sess: &mut ShellSession) -> Result<Option<String>> {
    let rooms = sess.ctx.chat.list_rooms().await;
    if rooms.is_empty() {
        return Ok(Some(style::info_line("No rooms yet. /create one.")));
    }
    let mut rows = Vec::new();
    for room in rooms {
        let members = sess.ctx.chat.member_ids(&room.id).await.len();
        rows.push(vec![
            room.name,
            room.room_type.tag().to_string(),
            members.to_string(),
        ]);
    }
    Ok(Some(style::table(&["room", "type", "members"], &rows)))
}

async fn who(sess: &mut ShellSession) -> Result<Option<String>> {
    let room = sess
        .current_chat_room()
        .ok_or_else(|| GameError::invalid("join a room first"))?;
    let room = sess.ctx.chat.find_room(&room).await?;
    let mut out = style::heading(&format!("Members of {}", room.name));
    for user_id in sess.ctx.chat.member_ids(&room.id).await {
        match sess.ctx.users.get(&user_id).await {
            Ok(user) => out.push_str(&format!("  {}{}", user.username, style::NEWLINE)),
            Err(_) => out.push_str(&format!("  {}{}", user_id.bright_black(), style::NEWLINE)),
        }
    }
    Ok(Some(out))
}

async fn history(sess: &mut ShellSession, args: &[String]) -> Result<Option<String>> {
    let room = sess
        .current_chat_room()
        .ok_or_else(|| GameError::invalid("join a room first"))?;
    let limit: i64 = args
        .first()
        .map(|n| n.parse().unwrap_or(20))
        .unwrap_or(20)
        .clamp(1, 100);
    let messages = sess.ctx.chat.history(&room, &sess.user.id, limit).await?;
    let mut out = String::new();
    for message in messages {
        out.push_str(&style::chat_line(&message.username, &message.content));
    }
    Ok(Some(out))
}
