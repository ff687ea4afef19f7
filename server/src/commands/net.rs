/// Network commands: scanning, ssh hops, server creation.

use colored::Colorize;
use termsh_core::models::Server;
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

pub async fn scan(sess: &mut ShellSession, args: &[String]) -> Out {
    match args.first() {
        Some(ip) => scan_one(sess, ip).await,
        None => scan_overview(sess).await,
    }
}

/// Root shell: every top-level server. Inside ssh: the current server's
/// neighbors and local network.
async fn scan_overview(sess: &mut ShellSession) -> Out {
    match sess.current_path().map(str::to_string) {
        None => {
            let servers = sess.ctx.graph.list_top_level().await?;
            let mut rows = Vec::new();
            for server in &servers {
                rows.push(vec![
                    server.ip.clone(),
                    server.security_level.to_string(),
                    server
                        .services
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                    shop_marker(sess, &server.ip).await,
                ]);
            }
            text(style::table(&["ip", "security", "services", "shop"], &rows))
        }
        Some(path) => {
            let server = sess.ctx.graph.resolve_path(&path).await?;
            let mut out = style::heading("Connected hosts");
            for ip in &server.connected_ips {
                out.push_str(&format!("  {}{}", ip, style::NEWLINE));
            }
            if !server.local_network.is_empty() {
                out.push_str(&style::heading("Local network"));
                for ip in &server.local_network {
                    out.push_str(&format!("  {}{}", ip.bright_yellow(), style::NEWLINE));
                }
            }
            text(out)
        }
    }
}

async fn scan_one(sess: &mut ShellSession, ip: &str) -> Out {
    let server = sess.ctx.graph.get_server_by_ip(ip).await?;
    let shop = shop_marker(sess, &server.ip).await;
    text(render_server(&server, &shop))
}

async fn shop_marker(sess: &ShellSession, server_ip: &str) -> String {
    match sess.ctx.shops.find_shop(server_ip).await {
        Ok(shop) => shop.name,
        Err(_) => String::new(),
    }
}

fn render_server(server: &Server, shop: &str) -> String {
    let mut out = style::heading(&format!("{} ({})", server.ip, server.local_ip));
    out.push_str(&format!(
        "security {}   cpu {}/{}   bw {:.0}/{:.0}   ram {}/{}{}",
        server.security_level.to_string().bright_red(),
        server.used_resources.cpu,
        server.resources.cpu,
        server.used_resources.bandwidth,
        server.resources.bandwidth,
        server.used_resources.ram,
        server.resources.ram,
        style::NEWLINE
    ));
    if !shop.is_empty() {
        out.push_str(&format!("shop: {}{}", shop.bright_yellow().bold(), style::NEWLINE));
    }

    let rows: Vec<Vec<String>> = server
        .services
        .iter()
        .map(|service| {
            vec![
                service.name.clone(),
                service.port.to_string(),
                if service.vulnerable { "yes".to_string() } else { "no".to_string() },
                service
                    .vulnerabilities
                    .iter()
                    .map(|v| format!("{} lv{}", v.kind, v.level))
                    .collect::<Vec<_>>()
                    .join(", "),
            ]
        })
        .collect();
    if !rows.is_empty() {
        out.push_str(&style::table(&["service", "port", "vulnerable", "vulnerabilities"], &rows));
    }

    if !server.roles.is_empty() {
        let roles: Vec<String> = server
            .roles
            .iter()
            .map(|r| format!("{} lv{}", r.role, r.level))
            .collect();
        out.push_str(&format!("roles: {}{}", roles.join(", "), style::NEWLINE));
    }
    if !server.connected_ips.is_empty() {
        out.push_str(&format!(
            "connected: {}{}",
            server.connected_ips.join(", "),
            style::NEWLINE
        ));
    }
    if !server.listed_tools.is_empty() {
        out.push_str(&format!(
            "tools: {}{}",
            server.listed_tools.join(", ").bright_magenta(),
            style::NEWLINE
        ));
    }
    out
}

/// Exploited servers can be entered; the path stacks on the current frame.
pub async fn ssh(sess: &mut ShellSession, args: &[String]) -> Out {
    let target = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: ssh <ip>"))?;

    let path = resolve_target_path(sess, target).await?;
    if !sess.ctx.exploits.can_ssh(&sess.user.id, &path).await? {
        return Err(GameError::denied(format!(
            "no exploited service on {} — break one first",
            path
        )));
    }

    let duration = progress::duration_for(&sess.user.resources, progress::SSH_BASE);
    progress::run(&sess.out, "Connecting", duration).await;
    Ok(CommandOutcome::SshConnect(path))
}

/// From inside a server, a bare child ip means one hop down; anything else
/// is a fresh top-level path.
async fn resolve_target_path(sess: &ShellSession, target: &str) -> Result<String> {
    if let Some(current) = sess.current_path() {
        let here = sess.ctx.graph.resolve_path(current).await?;
        if here.local_network.iter().any(|child| child == target) {
            return Ok(ServerGraph::join_path(current, target));
        }
    }
    // Normalize loose lookups (local_ip) to the canonical key.
    let server = sess.ctx.graph.get_server_by_ip(target).await?;
    Ok(server.ip)
}

pub async fn server_info(sess: &mut ShellSession, _args: &[String]) -> Out {
    match sess.current_path().map(str::to_string) {
        Some(path) => {
            let server = sess.ctx.graph.resolve_path(&path).await?;
            let shop = shop_marker(sess, &server.ip).await;
            text(render_server(&server, &shop))
        }
        None => {
            let mut out = style::heading("Your machine");
            out.push_str(&format!(
                "inet {}   local {}{}",
                sess.user.public_ip, sess.user.local_ip, style::NEWLINE
            ));
            out.push_str(&style::info_line("ssh into a server to inspect it with `info`."));
            text(out)
        }
    }
}

pub async fn create_server(sess: &mut ShellSession, _args: &[String]) -> Out {
    let origin = sess.current_path().map(str::to_string);
    let origin_ip = match origin {
        Some(path) => Some(sess.ctx.graph.resolve_path(&path).await?.ip),
        None => None,
    };
    let server = sess.ctx.graph.create_server(origin_ip.as_deref()).await?;
    text(style::ok_line(&format!(
        "Server {} is up (security {})",
        server.ip, server.security_level
    )))
}

pub async fn create_local_server(sess: &mut ShellSession, _args: &[String]) -> Out {
    let path = sess
        .current_path()
        .map(str::to_string)
        .ok_or_else(|| GameError::invalid("createLocalServer only works inside a server — ssh somewhere first"))?;
    let server = sess.ctx.graph.create_local_server(&path).await?;
    text(style::ok_line(&format!(
        "Local server {} joined this network",
        server.ip
    )))
}
