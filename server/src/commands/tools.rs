/// Tool commands: download, inventory, patching, mining and the dynamic
/// per-tool commands routed by kind.

use colored::Colorize;
use termsh_core::models::{now_millis, ToolKind};
use termsh_core::servers::ServerGraph;
use termsh_core::{GameError, Result};

use crate::dispatch::CommandOutcome;
use crate::progress;
use crate::session::ShellSession;
use crate::style;

type Out = Result<CommandOutcome>;

fn text(s: String) -> Out {
    Ok(CommandOutcome::Output(s))
}

pub async fn get(sess: &mut ShellSession, args: &[String]) -> Out {
    let [ip, tool_name] = args else {
        return Err(GameError::invalid("usage: get <ip> <tool>"));
    };
    let server = sess.ctx.graph.get_server_by_ip(ip).await?;
    // Validate before burning the user's time on the bar.
    if !server.listed_tools.iter().any(|t| t == tool_name) {
        return Err(GameError::not_found(format!("tool {} on {}", tool_name, ip)));
    }

    let duration = progress::duration_for(&sess.user.resources, progress::DOWNLOAD_BASE);
    progress::run(&sess.out, &format!("Downloading {}", tool_name), duration).await;

    let state = sess.ctx.tools.download(&sess.user.id, &server, tool_name).await?;
    let description = sess
        .ctx
        .store
        .get_tool_by_name(tool_name)
        .await?
        .map(|t| t.description)
        .unwrap_or_default();
    sess.register_tool_command(&state.tool_name, &description);
    text(style::ok_line(&format!(
        "{} v{} installed — run it as a command",
        state.tool_name, state.version
    )))
}

pub async fn list(sess: &mut ShellSession, _args: &[String]) -> Out {
    let owned = sess.ctx.tools.owned(&sess.user.id).await?;
    if owned.is_empty() {
        return text(style::info_line("No tools yet. Try: get repo password_cracker"));
    }
    let rows: Vec<Vec<String>> = owned
        .into_iter()
        .map(|state| {
            vec![
                format!("{} v{}", state.tool_name, state.version),
                state
                    .effective_exploits
                    .iter()
                    .map(|e| format!("{} lv{}", e.kind, e.level))
                    .collect::<Vec<_>>()
                    .join(", "),
                format!(
                    "{}/{:.0}/{}",
                    state.effective_resources.cpu,
                    state.effective_resources.bandwidth,
                    state.effective_resources.ram
                ),
                state.applied_patches.join(", "),
            ]
        })
        .collect();
    text(style::table(&["tool", "exploits", "cpu/bw/ram", "patches"], &rows))
}

pub async fn exploited(sess: &mut ShellSession, _args: &[String]) -> Out {
    let rows = sess.ctx.exploits.exploited(&sess.user.id).await?;
    if rows.is_empty() {
        return text(style::info_line("No footholds yet."));
    }
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!(
            "{} ({}){}",
            row.server_path.bright_green(),
            row.service_name,
            style::NEWLINE
        ));
    }
    text(out)
}

pub async fn patches(sess: &mut ShellSession, _args: &[String]) -> Out {
    let names = sess.ctx.tools.inventory_patches(&sess.user.id).await?;
    if names.is_empty() {
        return text(style::info_line("No patches in inventory. Shops sell them."));
    }
    let mut rows = Vec::new();
    for name in names {
        let patch = sess.ctx.tools.catalog_patch(&name).await?;
        rows.push(vec![patch.name, patch.target_tool, patch.description]);
    }
    text(style::table(&["patch", "targets", "what it does"], &rows))
}

pub async fn patch(sess: &mut ShellSession, args: &[String]) -> Out {
    match args {
        [info, name] if info == "info" => {
            let patch = sess.ctx.tools.catalog_patch(name).await?;
            let mut out = style::heading(&patch.name);
            out.push_str(&format!("targets {}{}", patch.target_tool.bright_magenta(), style::NEWLINE));
            out.push_str(&patch.description);
            out.push_str(style::NEWLINE);
            for e in &patch.exploits {
                out.push_str(&format!("  {} → lv{}{}", e.kind, e.level, style::NEWLINE));
            }
            let r = &patch.resources;
            if r.cpu != 0 || r.bandwidth != 0.0 || r.ram != 0 {
                out.push_str(&format!(
                    "  resources {:+}/{:+.0}/{:+}{}",
                    r.cpu, r.bandwidth, r.ram, style::NEWLINE
                ));
            }
            text(out)
        }
        [patch_name, tool_name] => {
            let state = sess
                .ctx
                .tools
                .apply_patch(&sess.user.id, patch_name, tool_name)
                .await?;
            text(style::ok_line(&format!(
                "{} applied — {} is now v{}",
                patch_name, tool_name, state.version
            )))
        }
        _ => Err(GameError::invalid("usage: patch <patch> <tool> | patch info <name>")),
    }
}

pub async fn crypto_miner(sess: &mut ShellSession, args: &[String]) -> Out {
    let ip = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: crypto_miner <ip>"))?;
    let miner = sess.ctx.mining.start_mining(&sess.user.id, ip).await?;
    text(style::ok_line(&format!(
        "Mining on {} — reserved {}/{:.0}/{}",
        miner.server_ip,
        miner.reservation.cpu,
        miner.reservation.bandwidth,
        miner.reservation.ram
    )))
}

pub async fn stop_mining(sess: &mut ShellSession, args: &[String]) -> Out {
    let ip = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: stop_mining <ip>"))?;
    let miner = sess.ctx.mining.stop_mining(&sess.user.id, ip).await?;
    text(style::ok_line(&format!("Stopped mining on {}", miner.server_ip)))
}

pub async fn miners(sess: &mut ShellSession, _args: &[String]) -> Out {
    let miners = sess.ctx.mining.list_for(&sess.user.id).await?;
    if miners.is_empty() {
        return text(style::info_line("No active miners."));
    }
    let rows: Vec<Vec<String>> = miners
        .into_iter()
        .map(|m| {
            let minutes = ((now_millis() - m.started_at) as f64 / 60_000.0).max(0.0);
            vec![
                m.server_ip,
                format!("{}/{:.0}/{}", m.reservation.cpu, m.reservation.bandwidth, m.reservation.ram),
                format!("{:.1} min", minutes),
            ]
        })
        .collect();
    text(style::table(&["server", "reservation", "since last payout"], &rows))
}

pub async fn wallet(sess: &mut ShellSession, _args: &[String]) -> Out {
    sess.refresh_user().await?;
    text(format!(
        "crypto {}   data {}{}",
        format!("{:.2}", sess.user.wallet.crypto).bright_yellow().bold(),
        format!("{:.2}", sess.user.wallet.data).bright_cyan(),
        style::NEWLINE
    ))
}

/// Dynamic dispatch for downloaded tools: any owned tool runs as a command,
/// routed by its kind tag.
pub async fn run_tool(sess: &mut ShellSession, cmd: &str, args: &[String]) -> Out {
    let tool = match sess.ctx.store.get_tool_by_name(cmd).await? {
        Some(tool) => tool,
        None => {
            return Err(GameError::invalid(format!("{}: command not found", cmd)));
        }
    };
    if !sess.ctx.tools.owns(&sess.user.id, &tool.name).await? {
        return Err(GameError::denied(format!(
            "you don't own {} — get it from a server first",
            tool.name
        )));
    }

    match tool.kind {
        ToolKind::Miner => crypto_miner(sess, args).await,
        ToolKind::Exploit => {
            let path = target_path(sess, args).await?;
            let service = tool
                .service
                .clone()
                .ok_or_else(|| GameError::internal(format!("{} has no target service", tool.name)))?;
            let duration = progress::duration_for(&sess.user.resources, progress::EXPLOIT_BASE);
            progress::run(&sess.out, &format!("Running {}", tool.name), duration).await;
            let outcome = sess
                .ctx
                .exploits
                .exploit_server(&sess.user.id, &path, &tool.name, &service)
                .await?;
            text(style::ok_line(&format!(
                "Exploited {} on {} (+{} xp)",
                outcome.service_name, path, outcome.xp
            )))
        }
        ToolKind::MultiExploit => {
            let path = target_path(sess, args).await?;
            let duration = progress::duration_for(&sess.user.resources, progress::EXPLOIT_BASE);
            progress::run(&sess.out, &format!("Running {}", tool.name), duration).await;
            let outcomes = sess
                .ctx
                .exploits
                .exploit_all_services(&sess.user.id, &path, &tool.name)
                .await?;
            let mut out = String::new();
            for o in &outcomes {
                out.push_str(&style::ok_line(&format!(
                    "Exploited {} on {} (+{} xp)",
                    o.service_name, path, o.xp
                )));
            }
            text(out)
        }
        ToolKind::Info | ToolKind::Rootkit => {
            let path = target_path(sess, args).await?;
            let xp = sess
                .ctx
                .exploits
                .run_support_tool(&sess.user.id, &path, &tool.name)
                .await?;
            text(style::ok_line(&format!("{} finished (+{} xp)", tool.name, xp)))
        }
    }
}

/// First argument as an exploitation path; a bare child ip of the current
/// server extends the current path.
async fn target_path(sess: &ShellSession, args: &[String]) -> Result<String> {
    let target = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: <tool> <ip>"))?;
    if let Some(current) = sess.current_path() {
        let here = sess.ctx.graph.resolve_path(current).await?;
        if here.local_network.iter().any(|child| child == target) {
            return Ok(ServerGraph::join_path(current, target));
        }
    }
    if target.contains(".localNetwork.") {
        return Ok(target.clone());
    }
    let server = sess.ctx.graph.get_server_by_ip(target).await?;
    Ok(server.ip)
}
