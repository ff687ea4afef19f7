/// SSH transport
///
/// Thin adapter over russh: password auth goes through the shared
/// UserService (auto-registering new names), a shell request spawns the
/// session task, and channel data is forwarded byte-for-byte into it. Key
/// exchange and channel bookkeeping stay inside the library.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Server, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use russh_keys::key::KeyPair;
use tokio::sync::{mpsc, watch};

use termsh_core::models::User;

use crate::session::{Outbound, SessionCtx, ShellSession};

pub struct SshServer {
    ctx: Arc<SessionCtx>,
}

impl SshServer {
    pub fn new(ctx: Arc<SessionCtx>) -> Self {
        Self { ctx }
    }

    /// Accept loop; resolves when the shutdown flag flips.
    pub async fn listen(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let addr = self.ctx.config.ssh_addr();
        let key = load_host_key(self.ctx.config.hostkey_path.as_deref())?;
        let config = Arc::new(russh::server::Config {
            methods: MethodSet::PASSWORD,
            auth_rejection_time: Duration::from_millis(300),
            inactivity_timeout: Some(Duration::from_secs(3600)),
            keys: vec![key],
            ..Default::default()
        });

        tracing::info!("🔐 SSH listening on {}", addr);
        tokio::select! {
            result = self.run_on_address(config, addr) => {
                result.context("ssh listener")?;
            }
            _ = shutdown.changed() => {
                tracing::info!("🔐 SSH listener stopped");
            }
        }
        Ok(())
    }
}

fn load_host_key(path: Option<&str>) -> anyhow::Result<KeyPair> {
    if let Some(path) = path {
        if std::path::Path::new(path).exists() {
            return russh_keys::load_secret_key(path, None)
                .with_context(|| format!("host key at {}", path));
        }
        tracing::warn!("⚠️  No host key at {} — generating an ephemeral one", path);
    }
    KeyPair::generate_ed25519().context("generate ed25519 host key")
}

impl Server for SshServer {
    type Handler = SshHandler;

    fn new_client(&mut self, peer: Option<std::net::SocketAddr>) -> SshHandler {
        tracing::debug!("🔌 SSH connection from {:?}", peer);
        SshHandler {
            ctx: self.ctx.clone(),
            user: None,
            input_tx: None,
        }
    }
}

pub struct SshHandler {
    ctx: Arc<SessionCtx>,
    user: Option<User>,
    input_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl Handler for SshHandler {
    type Error = anyhow::Error;

    /// Any new username/password pair auto-registers; `guest` and wrong
    /// passwords are rejected.
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.ctx.users.login_or_register(user, password).await {
            Ok(user) => {
                self.user = Some(user);
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::debug!("🔐 Auth failed for {}: {}", user, e);
                Ok(Auth::Reject { proceed_with_methods: None })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let user = self
            .user
            .clone()
            .ok_or_else(|| anyhow::anyhow!("shell before auth"))?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.input_tx = Some(input_tx);

        // Writer: session output -> ssh channel; closes the channel when
        // the session ends.
        let handle = session.handle();
        tokio::spawn(async move {
            while let Some(bytes) = out_rx.recv().await {
                if handle.data(channel, CryptoVec::from(bytes)).await.is_err() {
                    break;
                }
            }
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });

        let shell = ShellSession::new(self.ctx.clone(), user, "ssh", Outbound::new(out_tx)).await?;
        tokio::spawn(shell.run(input_rx));

        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = &self.input_tx {
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the sender ends the session task's input loop.
        self.input_tx = None;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.input_tx = None;
        Ok(())
    }
}
