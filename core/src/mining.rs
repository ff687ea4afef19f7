/// Mining engine
///
/// Long-running reward accrual per (user, server). A start copies the
/// reservation from the user's effective crypto_miner and holds it on the
/// server until stop; a single engine-wide ticker credits wallets. Miners
/// are process-scoped: they survive session teardown and restart recovery
/// re-reserves them.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::{GameError, Result};
use crate::models::{new_id, now_millis, ActiveMiner};
use crate::servers::ServerGraph;
use crate::store::Store;
use crate::tools::ToolRuntime;
use crate::types::Resources;

/// Ticker period.
pub const TICK: Duration = Duration::from_secs(5);
/// Base reward in crypto per second.
pub const RATE_PER_SEC: f64 = 0.1;

pub const MINER_TOOL: &str = "crypto_miner";

pub fn cpu_factor(reservation: &Resources) -> f64 {
    1.0 + reservation.cpu as f64 / 100.0
}

pub struct MiningEngine {
    store: Store,
    graph: Arc<ServerGraph>,
    tools: Arc<ToolRuntime>,
}

impl MiningEngine {
    pub fn new(store: Store, graph: Arc<ServerGraph>, tools: Arc<ToolRuntime>) -> Self {
        Self { store, graph, tools }
    }

    /// Reserve the effective miner's cost on the server and persist the
    /// ActiveMiner, compensating the reservation if the row insert fails.
    pub async fn start_mining(&self, user_id: &str, server_ip: &str) -> Result<ActiveMiner> {
        let effective = self.tools.effective_tool(user_id, MINER_TOOL).await?;
        let server = self.graph.get_server_by_ip(server_ip).await?;

        if self.store.get_miner(user_id, &server.ip).await?.is_some() {
            return Err(GameError::conflict(format!("already mining on {}", server.ip)));
        }

        let reservation = *effective.cost();
        self.graph.try_reserve(&server.ip, &reservation).await?;

        let miner = ActiveMiner {
            id: new_id(),
            user_id: user_id.to_string(),
            server_ip: server.ip.clone(),
            reservation,
            started_at: now_millis(),
        };
        let reserved = self.graph.get_server_by_ip(&server.ip).await?;
        if let Err(e) = self.store.start_miner(&reserved, &miner).await {
            // Hand the reservation back before surfacing the failure.
            let _ = self.graph.release(&server.ip, &reservation).await;
            return Err(e);
        }
        tracing::info!("⛏️  {} started mining on {}", user_id, server.ip);
        Ok(miner)
    }

    /// Release the stored reservation (never a rereading of the tool) and
    /// drop the row.
    pub async fn stop_mining(&self, user_id: &str, server_ip: &str) -> Result<ActiveMiner> {
        let server = self.graph.get_server_by_ip(server_ip).await?;
        let miner = self
            .store
            .get_miner(user_id, &server.ip)
            .await?
            .ok_or_else(|| GameError::not_found(format!("active miner on {}", server.ip)))?;
        self.graph.release(&server.ip, &miner.reservation).await?;
        let released = self.graph.get_server_by_ip(&server.ip).await?;
        self.store.stop_miner(&released, &miner.id).await?;
        tracing::info!("⛏️  {} stopped mining on {}", user_id, server.ip);
        Ok(miner)
    }

    pub async fn list_for(&self, user_id: &str) -> Result<Vec<ActiveMiner>> {
        self.store.list_miners(user_id).await
    }

    /// One reward pass over every active miner. A miner whose grant fails
    /// keeps its old `started_at`, so the skipped span pays out on the next
    /// successful tick.
    pub async fn tick(&self) -> Result<usize> {
        let miners = self.store.list_all_miners().await?;
        let mut granted = 0;
        for miner in miners {
            let now = now_millis();
            let elapsed_secs = (now - miner.started_at).max(0) as f64 / 1000.0;
            if elapsed_secs <= 0.0 {
                continue;
            }
            let reward = RATE_PER_SEC * cpu_factor(&miner.reservation) * elapsed_secs;
            match self
                .store
                .grant_mining_reward(&miner.id, &miner.user_id, reward, now)
                .await
            {
                Ok(()) => granted += 1,
                Err(e) => {
                    tracing::warn!(
                        "⚠️  Skipping reward tick for miner {} on {}: {}",
                        miner.id,
                        miner.server_ip,
                        e
                    );
                }
            }
        }
        Ok(granted)
    }

    /// Restart recovery: recompute each mining server's `used_resources`
    /// from the persisted reservations (miners are the only holders). A
    /// server oversubscribed after the rebuild sheds its newest miners
    /// first.
    pub async fn recover(&self) -> Result<()> {
        let mut miners = self.store.list_all_miners().await?;
        miners.sort_by_key(|m| m.started_at);

        let mut by_server: std::collections::HashMap<String, Vec<ActiveMiner>> =
            std::collections::HashMap::new();
        for miner in miners {
            by_server.entry(miner.server_ip.clone()).or_default().push(miner);
        }

        for (server_ip, mut server_miners) in by_server {
            let mut server = match self.graph.get_server_by_ip(&server_ip).await {
                Ok(s) => s,
                Err(_) => {
                    tracing::warn!("⚠️  Dropping miners on vanished server {}", server_ip);
                    for miner in &server_miners {
                        self.store.delete_miner(&miner.id).await?;
                    }
                    continue;
                }
            };

            // Shed newest-first until the rebuilt total fits.
            loop {
                let total = server_miners
                    .iter()
                    .fold(Resources::default(), |acc, m| acc.plus(&m.reservation));
                if Resources::default().fits(&total, &server.resources) {
                    server.used_resources = total;
                    break;
                }
                let dropped = server_miners.pop().expect("non-empty while oversubscribed");
                tracing::warn!(
                    "⚠️  Stopping miner {} on {}: oversubscribed after restart",
                    dropped.id,
                    server_ip
                );
                self.store.delete_miner(&dropped.id).await?;
            }
            self.graph.save(&server).await?;
        }
        Ok(())
    }

    /// Engine-wide ticker. Flushes one final partial reward when shutdown
    /// flips, then exits.
    pub fn spawn_ticker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            tracing::error!("❌ Mining tick failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            if let Err(e) = self.tick().await {
                                tracing::error!("❌ Final mining flush failed: {}", e);
                            }
                            tracing::info!("⛏️  Mining ticker stopped");
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Server, Tool, ToolKind, User};
    use crate::types::Wallet;

    struct Rig {
        engine: Arc<MiningEngine>,
        graph: Arc<ServerGraph>,
        store: Store,
    }

    async fn rig() -> Rig {
        let store = Store::open("sqlite::memory:").await.unwrap();
        let graph = Arc::new(ServerGraph::new(store.clone()));
        let tools = Arc::new(ToolRuntime::new(store.clone()));
        let engine = Arc::new(MiningEngine::new(store.clone(), graph.clone(), tools.clone()));

        store
            .insert_tool(&Tool {
                id: new_id(),
                name: MINER_TOOL.to_string(),
                description: String::new(),
                kind: ToolKind::Miner,
                cost: Resources::new(50, 10.0, 4),
                exploits: Vec::new(),
                service: None,
                is_patch: false,
            })
            .await
            .unwrap();
        store
            .insert_user(&User {
                id: "u1".to_string(),
                username: "alice".to_string(),
                password_hash: String::new(),
                public_ip: "1.2.3.4".to_string(),
                local_ip: "10.0.0.9".to_string(),
                mac: "02:00:00:00:00:01".to_string(),
                level: 0,
                experience: 0,
                resources: Resources::new(200, 300.0, 24),
                wallet: Wallet::new(15.0, 1200.0),
                filesystem: serde_json::json!({}),
                created_at: 0,
            })
            .await
            .unwrap();
        let repo = Server {
            ip: "repo".to_string(),
            local_ip: "10.0.0.1".to_string(),
            security_level: 1,
            resources: Resources::new(1000, 1000.0, 64),
            used_resources: Resources::default(),
            wallet: Wallet::default(),
            listed_tools: vec![MINER_TOOL.to_string()],
            connected_ips: Vec::new(),
            services: Vec::new(),
            roles: Vec::new(),
            filesystem: serde_json::json!({}),
            local_network: Vec::new(),
            parent_ip: None,
            created_at: 0,
        };
        store.insert_server(&repo).await.unwrap();
        let mut target = repo.clone();
        target.ip = "1.1.1.1".to_string();
        target.resources = Resources::new(120, 100.0, 16);
        target.listed_tools = Vec::new();
        store.insert_server(&target).await.unwrap();

        tools.download("u1", &repo, MINER_TOOL).await.unwrap();

        Rig { engine, graph, store }
    }

    #[test]
    fn test_cpu_factor() {
        assert_eq!(cpu_factor(&Resources::new(50, 0.0, 0)), 1.5);
        assert_eq!(cpu_factor(&Resources::new(0, 0.0, 0)), 1.0);
    }

    #[tokio::test]
    async fn test_start_stop_round_trip() {
        let rig = rig().await;
        rig.engine.start_mining("u1", "1.1.1.1").await.unwrap();

        let server = rig.graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert_eq!(server.used_resources, Resources::new(50, 10.0, 4));

        // duplicate start conflicts
        assert!(matches!(
            rig.engine.start_mining("u1", "1.1.1.1").await,
            Err(GameError::Conflict(_))
        ));

        rig.engine.stop_mining("u1", "1.1.1.1").await.unwrap();
        let server = rig.graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert_eq!(server.used_resources, Resources::default());
        assert!(rig.engine.list_for("u1").await.unwrap().is_empty());

        assert!(matches!(
            rig.engine.stop_mining("u1", "1.1.1.1").await,
            Err(GameError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_resources() {
        let rig = rig().await;
        // Second miner from another user overflows the 120-cpu target.
        rig.store
            .insert_user(&User {
                id: "u2".to_string(),
                username: "bob".to_string(),
                password_hash: String::new(),
                public_ip: "5.6.7.8".to_string(),
                local_ip: "10.0.0.10".to_string(),
                mac: "02:00:00:00:00:02".to_string(),
                level: 0,
                experience: 0,
                resources: Resources::new(200, 300.0, 24),
                wallet: Wallet::default(),
                filesystem: serde_json::json!({}),
                created_at: 0,
            })
            .await
            .unwrap();
        let repo = rig.graph.get_server_by_ip("repo").await.unwrap();
        rig.engine.tools.download("u2", &repo, MINER_TOOL).await.unwrap();

        rig.engine.start_mining("u1", "1.1.1.1").await.unwrap();
        rig.engine.start_mining("u2", "1.1.1.1").await.unwrap();
        // 3rd reservation would need 150 cpu total
        rig.store
            .insert_user(&User {
                id: "u3".to_string(),
                username: "carol".to_string(),
                password_hash: String::new(),
                public_ip: "9.9.9.9".to_string(),
                local_ip: "10.0.0.11".to_string(),
                mac: "02:00:00:00:00:03".to_string(),
                level: 0,
                experience: 0,
                resources: Resources::new(200, 300.0, 24),
                wallet: Wallet::default(),
                filesystem: serde_json::json!({}),
                created_at: 0,
            })
            .await
            .unwrap();
        rig.engine.tools.download("u3", &repo, MINER_TOOL).await.unwrap();
        assert!(matches!(
            rig.engine.start_mining("u3", "1.1.1.1").await,
            Err(GameError::InsufficientResources)
        ));
    }

    #[tokio::test]
    async fn test_tick_credits_wallet_and_advances_clock() {
        let rig = rig().await;
        let miner = rig.engine.start_mining("u1", "1.1.1.1").await.unwrap();

        // Backdate the start by 10 s to get a deterministic span.
        sqlx::query("UPDATE active_miners SET started_at = $1 WHERE id = $2")
            .bind(miner.started_at - 10_000)
            .bind(&miner.id)
            .execute(rig.store.pool())
            .await
            .unwrap();

        let before = rig.store.get_user("u1").await.unwrap().wallet.crypto;
        rig.engine.tick().await.unwrap();
        let after = rig.store.get_user("u1").await.unwrap().wallet.crypto;

        // >= 10 s at 0.1/s with cpu_factor 1.5
        assert!(after - before >= 10.0 * RATE_PER_SEC * 1.5 - 1e-6);

        let advanced = rig.store.get_miner("u1", "1.1.1.1").await.unwrap().unwrap();
        assert!(advanced.started_at > miner.started_at);
    }

    #[tokio::test]
    async fn test_recover_rebuilds_reservations() {
        let rig = rig().await;
        rig.engine.start_mining("u1", "1.1.1.1").await.unwrap();

        // Simulate a crash that lost the accounting.
        let mut server = rig.graph.get_server_by_ip("1.1.1.1").await.unwrap();
        server.used_resources = Resources::default();
        rig.graph.save(&server).await.unwrap();

        rig.engine.recover().await.unwrap();
        let server = rig.graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert_eq!(server.used_resources, Resources::new(50, 10.0, 4));
        assert_eq!(rig.engine.list_for("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_sheds_oversubscribed_miners() {
        let rig = rig().await;
        rig.engine.start_mining("u1", "1.1.1.1").await.unwrap();

        // Shrink the server below the held reservation, as if reseeded.
        let mut server = rig.graph.get_server_by_ip("1.1.1.1").await.unwrap();
        server.resources = Resources::new(20, 5.0, 2);
        rig.graph.save(&server).await.unwrap();

        rig.engine.recover().await.unwrap();
        assert!(rig.engine.list_for("u1").await.unwrap().is_empty());
        let server = rig.graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert_eq!(server.used_resources, Resources::default());
    }
}
