/// WebSocket transport
///
/// axum serves the browser terminal page and a `/ws` endpoint whose frames
/// carry the same byte stream the SSH transport would. The first text frame
/// is a JSON login ({username, password} or {token}); the reply carries a
/// fresh token for reconnects. Everything after that is terminal bytes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use termsh_core::models::User;

use crate::session::{Outbound, SessionCtx, ShellSession};

pub fn router(ctx: Arc<SessionCtx>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(ctx)
}

pub async fn listen(ctx: Arc<SessionCtx>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr = ctx.config.web_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Web terminal on http://{}", addr);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    tracing::info!("🌐 Web listener stopped");
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../web/index.html"))
}

async fn health(State(ctx): State<Arc<SessionCtx>>) -> impl IntoResponse {
    let db_ok = ctx.store.list_sessions().await.is_ok();
    Json(json!({ "status": "ok", "database": db_ok }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<Arc<SessionCtx>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

#[derive(Deserialize)]
struct LoginFrame {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<SessionCtx>) {
    let user = match authenticate(&mut socket, &ctx).await {
        Some(user) => user,
        None => return,
    };

    let token = ctx.users.issue_token(&user).ok();
    let hello = json!({ "ok": true, "username": user.username, "token": token });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let shell = match ShellSession::new(ctx.clone(), user, "ws", Outbound::new(out_tx)).await {
        Ok(shell) => shell,
        Err(e) => {
            tracing::error!("❌ Could not open web session: {}", e);
            return;
        }
    };
    tokio::spawn(shell.run(input_rx));

    let (mut sink, mut stream) = socket.split();

    // Writer: session output -> text frames.
    let writer = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Reader: frames -> session input. Dropping input_tx ends the session.
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                let _ = input_tx.send(text.into_bytes());
            }
            Message::Binary(bytes) => {
                let _ = input_tx.send(bytes);
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    drop(input_tx);
    let _ = writer.await;
}

async fn authenticate(socket: &mut WebSocket, ctx: &SessionCtx) -> Option<User> {
    let frame = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => return None,
    };
    let login: LoginFrame = match serde_json::from_str(&frame) {
        Ok(login) => login,
        Err(_) => {
            let _ = socket
                .send(Message::Text(
                    json!({ "ok": false, "error": "first frame must be a login object" }).to_string(),
                ))
                .await;
            return None;
        }
    };

    let result = match login {
        LoginFrame { token: Some(token), .. } => ctx.users.verify_token(&token).await,
        LoginFrame { username: Some(username), password: Some(password), .. } => {
            ctx.users.login_or_register(&username, &password).await
        }
        _ => {
            let _ = socket
                .send(Message::Text(
                    json!({ "ok": false, "error": "need username+password or token" }).to_string(),
                ))
                .await;
            return None;
        }
    };

    match result {
        Ok(user) => Some(user),
        Err(e) => {
            let _ = socket
                .send(Message::Text(json!({ "ok": false, "error": e.to_string() }).to_string()))
                .await;
            None
        }
    }
}
