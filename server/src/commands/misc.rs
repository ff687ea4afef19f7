/// Identity, info and tutorial commands.

use colored::Colorize;
use termsh_core::{GameError, Result};

use crate::dispatch::{CommandOutcome, BUILTIN_COMMANDS};
use crate::session::ShellSession;
use crate::style;

type Out = Result<CommandOutcome>;

fn text(s: String) -> Out {
    Ok(CommandOutcome::Output(s))
}

pub async fn help(sess: &mut ShellSession, _args: &[String]) -> Out {
    let mut out = style::heading("Commands");
    for (name, description) in BUILTIN_COMMANDS {
        out.push_str(&format!(
            "  {:<18} {}{}",
            name.bright_cyan(),
            description,
            style::NEWLINE
        ));
    }
    let owned = sess.ctx.tools.owned(&sess.user.id).await?;
    if !owned.is_empty() {
        out.push_str(&style::heading("Your tools (run as commands)"));
        for state in owned {
            out.push_str(&format!(
                "  {:<18} v{}{}",
                state.tool_name.bright_magenta(),
                state.version,
                style::NEWLINE
            ));
        }
    }
    text(out)
}

pub async fn whoami(sess: &mut ShellSession, _args: &[String]) -> Out {
    text(format!("{}{}", sess.user.username, style::NEWLINE))
}

pub async fn name(sess: &mut ShellSession, args: &[String]) -> Out {
    let new_name = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: name <new-username>"))?
        .clone();
    sess.ctx.users.rename(&sess.user.id, &new_name).await?;
    sess.refresh_user().await?;
    sess.home_vfs_mut().rename_home_dir(&new_name)?;
    text(style::ok_line(&format!("You are now {}", new_name)))
}

pub async fn userinfo(sess: &mut ShellSession, _args: &[String]) -> Out {
    sess.refresh_user().await?;
    let u = &sess.user;
    let rows = vec![
        vec!["username".to_string(), u.username.clone()],
        vec!["level".to_string(), u.level.to_string()],
        vec!["experience".to_string(), u.experience.to_string()],
        vec!["cpu".to_string(), u.resources.cpu.to_string()],
        vec!["bandwidth".to_string(), format!("{:.1}", u.resources.bandwidth)],
        vec!["ram".to_string(), u.resources.ram.to_string()],
        vec!["crypto".to_string(), format!("{:.2}", u.wallet.crypto)],
        vec!["data".to_string(), format!("{:.2}", u.wallet.data)],
    ];
    text(style::table(&["stat", "value"], &rows))
}

pub async fn ifconfig(sess: &mut ShellSession, _args: &[String]) -> Out {
    let u = &sess.user;
    let mut out = String::new();
    out.push_str(&format!("inet  {}{}", u.public_ip.bright_green(), style::NEWLINE));
    out.push_str(&format!("local {}{}", u.local_ip, style::NEWLINE));
    out.push_str(&format!("ether {}{}", u.mac.bright_black(), style::NEWLINE));
    text(out)
}

pub async fn tutorial(sess: &mut ShellSession, args: &[String]) -> Out {
    match args.first() {
        None => {
            let mut out = style::heading("Tutorials — tutorial <id>");
            for t in &sess.ctx.catalog.tutorials {
                out.push_str(&format!(
                    "  {:<14} {}{}",
                    t.id.bright_cyan(),
                    t.title,
                    style::NEWLINE
                ));
            }
            text(out)
        }
        Some(id) => {
            let t = sess
                .ctx
                .catalog
                .tutorial(id)
                .ok_or_else(|| GameError::not_found(format!("tutorial {}", id)))?;
            let mut out = style::heading(&t.title);
            for line in t.body.lines() {
                out.push_str(line);
                out.push_str(style::NEWLINE);
            }
            text(out)
        }
    }
}

pub async fn who(sess: &mut ShellSession, _args: &[String]) -> Out {
    let sessions = sess.ctx.store.list_sessions().await?;
    let mut rows: Vec<Vec<String>> = sessions
        .into_iter()
        .map(|s| {
            let since = chrono::DateTime::from_timestamp(s.connected_at, 0)
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            vec![s.username, s.transport, since]
        })
        .collect();
    rows.sort();
    text(style::table(&["user", "via", "since (utc)"], &rows))
}
