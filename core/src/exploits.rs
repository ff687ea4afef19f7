/// Exploitation engine
///
/// Capability matching between a user's effective tools and a server's
/// service vulnerabilities. A successful match records an Exploitation row
/// keyed by (user, full path, service) which is what gates `ssh`.

use std::sync::Arc;

use crate::error::{GameError, Result};
use crate::models::{new_id, now_secs, Exploitation, ToolKind};
use crate::servers::ServerGraph;
use crate::store::Store;
use crate::tools::ToolRuntime;
use crate::types::{Exploit, Service};

pub struct ExploitOutcome {
    pub service_name: String,
    pub matched: Vec<Exploit>,
    pub xp: i64,
}

pub struct ExploitEngine {
    store: Store,
    graph: Arc<ServerGraph>,
    tools: Arc<ToolRuntime>,
}

impl ExploitEngine {
    pub fn new(store: Store, graph: Arc<ServerGraph>, tools: Arc<ToolRuntime>) -> Self {
        Self { store, graph, tools }
    }

    /// XP granted per successful run. Kits scale with the number of
    /// matched vulnerabilities.
    fn xp_for(tool_name: &str, matches: i64) -> i64 {
        match tool_name {
            "password_cracker" => 10,
            "ssh_exploit" => 15,
            "sql_injector" => 12,
            "xss_exploit" => 8,
            "exploit_kit" => 10 * matches,
            "advanced_exploit_kit" => 15 * matches,
            "rootkit" => 20,
            "user_enum" | "lan_sniffer" | "password_sniffer" | "packet_capture"
            | "packet_decoder" => 5,
            _ => 5,
        }
    }

    /// The §match test: every satisfied vulnerability joins the matched
    /// subset; at least one match means success.
    fn matched_subset(effective: &[Exploit], service: &Service) -> Vec<Exploit> {
        service
            .vulnerabilities
            .iter()
            .filter(|vuln| effective.iter().any(|e| e.satisfies(vuln)))
            .cloned()
            .collect()
    }

    /// Exploit one named service on the server at `server_path`.
    pub async fn exploit_server(
        &self,
        user_id: &str,
        server_path: &str,
        tool_name: &str,
        service_name: &str,
    ) -> Result<ExploitOutcome> {
        let server = self.graph.resolve_path(server_path).await?;
        let service = server
            .services
            .iter()
            .find(|s| s.name == service_name)
            .ok_or_else(|| {
                GameError::not_found(format!("service {} on {}", service_name, server.ip))
            })?;
        if !service.vulnerable {
            return Err(GameError::denied(format!("service {} is not vulnerable", service_name)));
        }

        let effective = self.tools.effective_tool(user_id, tool_name).await?;
        if let Some(target) = &effective.tool.service {
            if target != service_name {
                return Err(GameError::invalid(format!(
                    "{} targets {} services",
                    tool_name, target
                )));
            }
        }

        let matched = Self::matched_subset(effective.exploits(), service);
        if matched.is_empty() {
            return Err(GameError::denied(format!(
                "{} cannot break any vulnerability of {}",
                tool_name, service_name
            )));
        }

        let xp = Self::xp_for(tool_name, matched.len() as i64);
        let exploitation = Exploitation {
            id: new_id(),
            user_id: user_id.to_string(),
            server_path: server_path.to_string(),
            service_name: service_name.to_string(),
            exploits: matched.clone(),
            created_at: now_secs(),
        };
        self.store.record_exploitation(&exploitation, xp).await?;
        tracing::info!(
            "💥 {} exploited {} ({}) with {}",
            user_id,
            server_path,
            service_name,
            tool_name
        );
        Ok(ExploitOutcome { service_name: service_name.to_string(), matched, xp })
    }

    /// Kit behavior: run against every vulnerable service; partial success
    /// is success.
    pub async fn exploit_all_services(
        &self,
        user_id: &str,
        server_path: &str,
        tool_name: &str,
    ) -> Result<Vec<ExploitOutcome>> {
        let server = self.graph.resolve_path(server_path).await?;
        let vulnerable: Vec<String> = server
            .services
            .iter()
            .filter(|s| s.vulnerable)
            .map(|s| s.name.clone())
            .collect();
        if vulnerable.is_empty() {
            return Err(GameError::not_found(format!("vulnerable services on {}", server.ip)));
        }
        let mut outcomes = Vec::new();
        for service_name in vulnerable {
            match self
                .exploit_server(user_id, server_path, tool_name, &service_name)
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(GameError::PermissionDenied(_)) | Err(GameError::InvalidArgument(_)) => {}
                Err(other) => return Err(other),
            }
        }
        if outcomes.is_empty() {
            return Err(GameError::denied(format!(
                "{} matched nothing on {}",
                tool_name, server_path
            )));
        }
        Ok(outcomes)
    }

    /// Info tools need ownership only; rootkit additionally needs an
    /// existing exploitation on the target path.
    pub async fn run_support_tool(
        &self,
        user_id: &str,
        server_path: &str,
        tool_name: &str,
    ) -> Result<i64> {
        let effective = self.tools.effective_tool(user_id, tool_name).await?;
        // Resolve to surface NotFound on bad paths before anything else.
        self.graph.resolve_path(server_path).await?;
        if effective.tool.kind == ToolKind::Rootkit
            && !self.store.has_exploitation(user_id, server_path).await?
        {
            return Err(GameError::denied(format!(
                "rootkit needs an exploited service on {}",
                server_path
            )));
        }
        let xp = Self::xp_for(tool_name, 1);
        let experience = self.store.add_experience(user_id, xp).await?;
        tracing::debug!("🔎 {} ran {} against {} (exp {})", user_id, tool_name, server_path, experience);
        Ok(xp)
    }

    pub async fn exploited(&self, user_id: &str) -> Result<Vec<Exploitation>> {
        self.store.list_exploitations(user_id).await
    }

    /// SSH gate: an Exploitation row for any service on the path.
    pub async fn can_ssh(&self, user_id: &str, server_path: &str) -> Result<bool> {
        self.store.has_exploitation(user_id, server_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_id as nid, Server, Tool};
    use crate::types::{Resources, Wallet};

    fn server_with_services(ip: &str, services: Vec<Service>) -> Server {
        Server {
            ip: ip.to_string(),
            local_ip: "10.0.0.2".to_string(),
            security_level: 50,
            resources: Resources::new(100, 100.0, 16),
            used_resources: Resources::default(),
            wallet: Wallet::default(),
            listed_tools: vec!["password_cracker".to_string()],
            connected_ips: Vec::new(),
            services,
            roles: Vec::new(),
            filesystem: serde_json::json!({}),
            local_network: Vec::new(),
            parent_ip: None,
            created_at: 0,
        }
    }

    fn ssh_service(level: i64, vulnerable: bool) -> Service {
        Service {
            name: "ssh".to_string(),
            port: 22,
            vulnerable,
            level,
            vulnerabilities: vec![Exploit::new("ssh", level)],
        }
    }

    struct Rig {
        engine: ExploitEngine,
        store: Store,
    }

    async fn rig() -> Rig {
        let store = Store::open("sqlite::memory:").await.unwrap();
        let graph = Arc::new(ServerGraph::new(store.clone()));
        let tools = Arc::new(ToolRuntime::new(store.clone()));
        let engine = ExploitEngine::new(store.clone(), graph, tools);
        Rig { engine, store }
    }

    async fn seed_cracker(rig: &Rig, level: i64) {
        rig.store
            .insert_tool(&Tool {
                id: nid(),
                name: "password_cracker".to_string(),
                description: String::new(),
                kind: ToolKind::Exploit,
                cost: Resources::new(10, 5.0, 1),
                exploits: vec![Exploit::new("ssh", level), Exploit::new("password_cracking", level)],
                service: Some("ssh".to_string()),
                is_patch: false,
            })
            .await
            .unwrap();
    }

    async fn seed_user(rig: &Rig, id: &str) {
        let user = crate::models::User {
            id: id.to_string(),
            username: format!("user-{}", id),
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
        };
        rig.store.insert_user(&user).await.unwrap();
    }

    #[tokio::test]
    async fn test_equal_level_match_succeeds() {
        let rig = rig().await;
        seed_cracker(&rig, 10).await;
        seed_user(&rig, "u1").await;
        let server = server_with_services("1.1.1.1", vec![ssh_service(10, true)]);
        rig.store.insert_server(&server).await.unwrap();
        rig.engine
            .tools
            .download("u1", &server, "password_cracker")
            .await
            .unwrap();

        let outcome = rig
            .engine
            .exploit_server("u1", "1.1.1.1", "password_cracker", "ssh")
            .await
            .unwrap();
        assert_eq!(outcome.matched, vec![Exploit::new("ssh", 10)]);
        assert_eq!(outcome.xp, 10);

        assert!(rig.engine.can_ssh("u1", "1.1.1.1").await.unwrap());
        assert_eq!(rig.store.get_user("u1").await.unwrap().experience, 10);
    }

    #[tokio::test]
    async fn test_low_level_tool_is_rejected() {
        let rig = rig().await;
        seed_cracker(&rig, 5).await;
        seed_user(&rig, "u1").await;
        let server = server_with_services("1.1.1.1", vec![ssh_service(10, true)]);
        rig.store.insert_server(&server).await.unwrap();
        rig.engine.tools.download("u1", &server, "password_cracker").await.unwrap();

        assert!(matches!(
            rig.engine
                .exploit_server("u1", "1.1.1.1", "password_cracker", "ssh")
                .await,
            Err(GameError::PermissionDenied(_))
        ));
        assert!(!rig.engine.can_ssh("u1", "1.1.1.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_invulnerable_service_is_rejected() {
        let rig = rig().await;
        seed_cracker(&rig, 10).await;
        seed_user(&rig, "u1").await;
        let server = server_with_services("1.1.1.1", vec![ssh_service(10, false)]);
        rig.store.insert_server(&server).await.unwrap();
        rig.engine.tools.download("u1", &server, "password_cracker").await.unwrap();

        assert!(rig
            .engine
            .exploit_server("u1", "1.1.1.1", "password_cracker", "ssh")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_re_exploit_upserts_single_row() {
        let rig = rig().await;
        seed_cracker(&rig, 10).await;
        seed_user(&rig, "u1").await;
        let server = server_with_services("1.1.1.1", vec![ssh_service(10, true)]);
        rig.store.insert_server(&server).await.unwrap();
        rig.engine.tools.download("u1", &server, "password_cracker").await.unwrap();

        rig.engine.exploit_server("u1", "1.1.1.1", "password_cracker", "ssh").await.unwrap();
        rig.engine.exploit_server("u1", "1.1.1.1", "password_cracker", "ssh").await.unwrap();
        assert_eq!(rig.engine.exploited("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rootkit_requires_prior_exploitation() {
        let rig = rig().await;
        seed_user(&rig, "u1").await;
        let server = server_with_services("1.1.1.1", vec![ssh_service(10, true)]);
        rig.store.insert_server(&server).await.unwrap();
        rig.store
            .insert_tool(&Tool {
                id: nid(),
                name: "rootkit".to_string(),
                description: String::new(),
                kind: ToolKind::Rootkit,
                cost: Resources::new(5, 5.0, 1),
                exploits: Vec::new(),
                service: None,
                is_patch: false,
            })
            .await
            .unwrap();
        let mut repo = server_with_services("repo", vec![]);
        repo.listed_tools = vec!["rootkit".to_string()];
        rig.store.insert_server(&repo).await.unwrap();
        rig.engine.tools.download("u1", &repo, "rootkit").await.unwrap();

        assert!(matches!(
            rig.engine.run_support_tool("u1", "1.1.1.1", "rootkit").await,
            Err(GameError::PermissionDenied(_))
        ));
    }
}
