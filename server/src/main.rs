// terminal.sh server — SSH + WebSocket hacking-simulation service.
//
// Boot order: Store → catalog seed → engines → mining recovery/ticker →
// transports. Shutdown drains sessions, flushes one final mining tick and
// closes the store.

mod commands;
mod config;
mod dispatch;
mod editor;
mod progress;
mod session;
mod style;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use termsh_core::catalog;
use termsh_core::chat::ChatEngine;
use termsh_core::exploits::ExploitEngine;
use termsh_core::mining::MiningEngine;
use termsh_core::servers::ServerGraph;
use termsh_core::shops::ShopEngine;
use termsh_core::store::Store;
use termsh_core::tools::ToolRuntime;
use termsh_core::users::UserService;

use crate::config::Config;
use crate::session::SessionCtx;
use crate::transport::{ssh::SshServer, web};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    // The stream goes to remote terminals, not our stdout; always color.
    colored::control::set_override(true);

    let config = Config::load();
    tracing::info!("🚀 terminal.sh starting");

    if config.database_url.is_none() {
        if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("create database directory")?;
            }
        }
    }
    let store = Store::open(&config.database_url())
        .await
        .context("open database")?;
    store.clear_sessions().await.context("clear stale sessions")?;

    let catalog = Arc::new(
        catalog::seed(&store, config.seed_path.as_deref())
            .await
            .context("seed catalog")?,
    );

    let users = Arc::new(UserService::new(store.clone(), config.jwt_secret.clone()));
    let graph = Arc::new(ServerGraph::new(store.clone()));
    let tools = Arc::new(ToolRuntime::new(store.clone()));
    let exploits = Arc::new(ExploitEngine::new(store.clone(), graph.clone(), tools.clone()));
    let mining = Arc::new(MiningEngine::new(store.clone(), graph.clone(), tools.clone()));
    let shops = Arc::new(ShopEngine::new(store.clone()));
    let chat = Arc::new(ChatEngine::new(store.clone()));
    chat.load().await.context("load chat index")?;

    mining.recover().await.context("recover miners")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = mining.clone().spawn_ticker(shutdown_rx.clone());

    let ctx = Arc::new(SessionCtx {
        config,
        store: store.clone(),
        users,
        graph,
        tools,
        exploits,
        mining,
        shops,
        chat,
        catalog,
        shutdown: shutdown_rx.clone(),
    });

    let ssh_task = tokio::spawn(SshServer::new(ctx.clone()).listen(shutdown_rx.clone()));
    let web_task = tokio::spawn(web::listen(ctx.clone(), shutdown_rx.clone()));

    tokio::signal::ctrl_c().await.context("install ctrl-c handler")?;
    tracing::info!("🛑 Shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Final partial mining reward flushes inside the ticker task.
    let _ = ticker.await;
    let _ = ssh_task.await;
    let _ = web_task.await;

    store.close().await;
    tracing::info!("👋 terminal.sh stopped");
    Ok(())
}
