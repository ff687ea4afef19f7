/// Server graph
///
/// Servers live in a flat table keyed by `ip`; local networks hold child
/// ips as references, never embedded records. Dotted paths
/// (`A.localNetwork.B`) walk root-to-leaf along those references.
/// Reserve/release pairs on a server's resources run under a per-server
/// mutex so check-and-add is a single critical section.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;

use crate::error::{GameError, Result};
use crate::models::{now_secs, Server};
use crate::types::{Exploit, Resources, Role, Service, Wallet};

/// Separator between hops in an exploitation path.
pub const PATH_SEPARATOR: &str = ".localNetwork.";

pub struct ServerGraph {
    store: crate::store::Store,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ServerGraph {
    pub fn new(store: crate::store::Store) -> Self {
        Self { store, locks: Mutex::new(HashMap::new()) }
    }

    /// Split a dotted path into hops.
    pub fn split_path(path: &str) -> Vec<&str> {
        path.split(PATH_SEPARATOR).collect()
    }

    /// Append a hop to a path.
    pub fn join_path(parent: &str, child: &str) -> String {
        if parent.is_empty() {
            child.to_string()
        } else {
            format!("{}{}{}", parent, PATH_SEPARATOR, child)
        }
    }

    /// Lookup by `ip`, also accepting the `local_ip` field for convenience.
    pub async fn get_server_by_ip(&self, ip: &str) -> Result<Server> {
        self.store
            .get_server_loose(ip)
            .await?
            .ok_or_else(|| GameError::not_found(format!("server {}", ip)))
    }

    /// Walk a dotted path; every hop past the first must be referenced by
    /// its parent's local network.
    pub async fn resolve_path(&self, path: &str) -> Result<Server> {
        let hops = Self::split_path(path);
        let first = hops.first().ok_or_else(|| GameError::invalid("empty server path"))?;
        let mut current = self.get_server_by_ip(first).await?;
        for hop in &hops[1..] {
            if !current.local_network.iter().any(|child| child == hop) {
                return Err(GameError::not_found(format!(
                    "{} in local network of {}",
                    hop, current.ip
                )));
            }
            // Nested entries are cross-references into the flat table.
            current = self
                .store
                .get_server(hop)
                .await?
                .ok_or_else(|| GameError::not_found(format!("server {}", hop)))?;
        }
        Ok(current)
    }

    pub async fn list_top_level(&self) -> Result<Vec<Server>> {
        self.store.list_top_level_servers().await
    }

    pub async fn save(&self, server: &Server) -> Result<()> {
        self.store.save_server(server).await
    }

    /// Create a randomized top-level server. When `connect_to` names an
    /// existing server, the new ip is also appended to its neighbor list.
    pub async fn create_server(&self, connect_to: Option<&str>) -> Result<Server> {
        let server = self.random_server(None);
        self.store.insert_server(&server).await?;
        if let Some(origin_ip) = connect_to {
            if let Some(mut origin) = self.store.get_server(origin_ip).await? {
                if !origin.connected_ips.contains(&server.ip) {
                    origin.connected_ips.push(server.ip.clone());
                    self.store.save_server(&origin).await?;
                }
            }
        }
        tracing::info!("🖥️  Created server {} (security {})", server.ip, server.security_level);
        Ok(server)
    }

    /// Create a randomized server inside `parent_path`'s local network.
    pub async fn create_local_server(&self, parent_path: &str) -> Result<Server> {
        let mut parent = self.resolve_path(parent_path).await?;
        let server = self.random_server(Some(parent.ip.clone()));
        self.store.insert_server(&server).await?;
        parent.local_network.push(server.ip.clone());
        self.store.save_server(&parent).await?;
        tracing::info!("🖥️  Created local server {} under {}", server.ip, parent.ip);
        Ok(server)
    }

    fn random_server(&self, parent_ip: Option<String>) -> Server {
        let mut rng = rand::thread_rng();
        let security_level = rng.gen_range(10..=100);
        let resources = Resources::new(
            rng.gen_range(100..=500),
            rng.gen_range(100..=1000) as f64,
            rng.gen_range(8..=64),
        );

        let mut services = vec![self.random_service(&mut rng, "ssh", 22, true, security_level)];
        if rng.gen_bool(0.5) {
            let vulnerable = rng.gen_bool(0.7);
            services.push(self.random_service(&mut rng, "http", 80, vulnerable, security_level));
        }

        Server {
            ip: format!(
                "{}.{}.{}.{}",
                rng.gen_range(1..=255),
                rng.gen_range(0..=255),
                rng.gen_range(0..=255),
                rng.gen_range(1..=255u8)
            ),
            local_ip: format!(
                "10.{}.{}.{}",
                rng.gen_range(0..=255),
                rng.gen_range(0..=255),
                rng.gen_range(1..=255u8)
            ),
            security_level,
            resources,
            used_resources: Resources::default(),
            wallet: Wallet::new(rng.gen_range(0.0..10.0), rng.gen_range(0.0..500.0)),
            listed_tools: Vec::new(),
            connected_ips: Vec::new(),
            services,
            roles: vec![Role { role: "server".to_string(), level: security_level / 10 }],
            filesystem: serde_json::json!({}),
            local_network: Vec::new(),
            parent_ip,
            created_at: now_secs(),
        }
    }

    fn random_service(
        &self,
        rng: &mut impl Rng,
        name: &str,
        port: u16,
        vulnerable: bool,
        security_level: i64,
    ) -> Service {
        let pool: &[&str] = match name {
            "http" => &["sql_injection", "xss"],
            _ => &["ssh", "password_cracking", "buffer_overflow"],
        };
        let level = (security_level / 5 + rng.gen_range(0..5)).clamp(1, 20);
        let count = rng.gen_range(1..=2usize);
        let mut vulnerabilities = Vec::new();
        for _ in 0..count {
            let kind = pool[rng.gen_range(0..pool.len())];
            if !vulnerabilities.iter().any(|v: &Exploit| v.kind == kind) {
                vulnerabilities.push(Exploit::new(kind, level));
            }
        }
        Service {
            name: name.to_string(),
            port,
            vulnerable,
            level,
            vulnerabilities,
        }
    }

    async fn lock_for(&self, ip: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(ip.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Atomically check `used + request <= resources` and add. Fails with
    /// `InsufficientResources` without mutating anything.
    pub async fn try_reserve(&self, ip: &str, request: &Resources) -> Result<()> {
        let lock = self.lock_for(ip).await;
        let _guard = lock.lock().await;
        let mut server = self
            .store
            .get_server(ip)
            .await?
            .ok_or_else(|| GameError::not_found(format!("server {}", ip)))?;
        if !server.used_resources.fits(request, &server.resources) {
            return Err(GameError::InsufficientResources);
        }
        server.used_resources = server.used_resources.plus(request);
        self.store.save_server(&server).await
    }

    /// Subtract a reservation, clamping at zero.
    pub async fn release(&self, ip: &str, request: &Resources) -> Result<()> {
        let lock = self.lock_for(ip).await;
        let _guard = lock.lock().await;
        let mut server = self
            .store
            .get_server(ip)
            .await?
            .ok_or_else(|| GameError::not_found(format!("server {}", ip)))?;
        server.used_resources = server.used_resources.minus_clamped(request);
        self.store.save_server(&server).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn plain_server(ip: &str) -> Server {
        Server {
            ip: ip.to_string(),
            local_ip: format!("10.0.0.{}", 1),
            security_level: 50,
            resources: Resources::new(100, 100.0, 16),
            used_resources: Resources::default(),
            wallet: Wallet::default(),
            listed_tools: Vec::new(),
            connected_ips: Vec::new(),
            services: Vec::new(),
            roles: Vec::new(),
            filesystem: serde_json::json!({}),
            local_network: Vec::new(),
            parent_ip: None,
            created_at: 0,
        }
    }

    async fn graph() -> ServerGraph {
        let store = Store::open("sqlite::memory:").await.unwrap();
        ServerGraph::new(store)
    }

    #[test]
    fn test_path_grammar() {
        assert_eq!(ServerGraph::split_path("1.1.1.1"), vec!["1.1.1.1"]);
        assert_eq!(
            ServerGraph::split_path("a.localNetwork.b.localNetwork.c"),
            vec!["a", "b", "c"]
        );
        assert_eq!(ServerGraph::join_path("a", "b"), "a.localNetwork.b");
        assert_eq!(ServerGraph::join_path("", "a"), "a");
    }

    #[tokio::test]
    async fn test_resolve_nested_path() {
        let graph = graph().await;
        let mut root = plain_server("1.1.1.1");
        root.local_network.push("2.2.2.2".to_string());
        let mut mid = plain_server("2.2.2.2");
        mid.parent_ip = Some("1.1.1.1".to_string());
        mid.local_network.push("3.3.3.3".to_string());
        let mut leaf = plain_server("3.3.3.3");
        leaf.parent_ip = Some("2.2.2.2".to_string());
        for s in [&root, &mid, &leaf] {
            graph.store.insert_server(s).await.unwrap();
        }

        let found = graph
            .resolve_path("1.1.1.1.localNetwork.2.2.2.2.localNetwork.3.3.3.3")
            .await
            .unwrap();
        assert_eq!(found.ip, "3.3.3.3");

        // a hop not referenced by its parent does not resolve
        assert!(graph
            .resolve_path("1.1.1.1.localNetwork.3.3.3.3")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_lookup_by_local_ip() {
        let graph = graph().await;
        let mut server = plain_server("9.9.9.9");
        server.local_ip = "10.1.2.3".to_string();
        graph.store.insert_server(&server).await.unwrap();
        assert_eq!(graph.get_server_by_ip("10.1.2.3").await.unwrap().ip, "9.9.9.9");
    }

    #[tokio::test]
    async fn test_reserve_release_cycle() {
        let graph = graph().await;
        graph.store.insert_server(&plain_server("1.1.1.1")).await.unwrap();

        let req = Resources::new(60, 50.0, 8);
        graph.try_reserve("1.1.1.1", &req).await.unwrap();
        graph.try_reserve("1.1.1.1", &req).await.unwrap_err();

        let server = graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert_eq!(server.used_resources, req);

        graph.release("1.1.1.1", &req).await.unwrap();
        let server = graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert_eq!(server.used_resources, Resources::default());
    }

    #[tokio::test]
    async fn test_created_server_shape() {
        let graph = graph().await;
        let server = graph.create_server(None).await.unwrap();
        assert!(server.services.iter().any(|s| s.name == "ssh" && s.vulnerable));
        assert!(server.security_level >= 10 && server.security_level <= 100);
        assert!(server.local_ip.starts_with("10."));
        assert!(server.used_resources == Resources::default());
        for service in &server.services {
            assert!(!service.vulnerabilities.is_empty());
            for v in &service.vulnerabilities {
                assert!(v.level >= 1 && v.level <= 20);
            }
        }
    }

    #[tokio::test]
    async fn test_create_local_server_links_parent() {
        let graph = graph().await;
        graph.store.insert_server(&plain_server("1.1.1.1")).await.unwrap();
        let child = graph.create_local_server("1.1.1.1").await.unwrap();
        let parent = graph.get_server_by_ip("1.1.1.1").await.unwrap();
        assert!(parent.local_network.contains(&child.ip));
        assert_eq!(child.parent_ip.as_deref(), Some("1.1.1.1"));
        assert!(graph
            .resolve_path(&format!("1.1.1.1.localNetwork.{}", child.ip))
            .await
            .is_ok());
    }
}
