/// Tool runtime
///
/// Owned tools, per-user tool state and patch application. Every gameplay
/// subsystem that needs a tool's capability or cost goes through
/// `effective_tool`, never the base catalog row.

use crate::error::{GameError, Result};
use crate::models::{new_id, Patch, Tool, UserToolState};
use crate::store::Store;
use crate::types::{merge_exploits, Exploit, Resources};

/// A base tool folded together with the user's applied patches.
#[derive(Debug, Clone)]
pub struct EffectiveTool {
    pub tool: Tool,
    pub state: UserToolState,
}

impl EffectiveTool {
    pub fn exploits(&self) -> &[Exploit] {
        &self.state.effective_exploits
    }

    pub fn cost(&self) -> &Resources {
        &self.state.effective_resources
    }
}

pub struct ToolRuntime {
    store: Store,
}

impl ToolRuntime {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn catalog_tool(&self, name: &str) -> Result<Tool> {
        self.store
            .get_tool_by_name(name)
            .await?
            .ok_or_else(|| GameError::not_found(format!("tool {}", name)))
    }

    pub async fn catalog_patch(&self, name: &str) -> Result<Patch> {
        self.store
            .get_patch_by_name(name)
            .await?
            .ok_or_else(|| GameError::not_found(format!("patch {}", name)))
    }

    /// Download a tool listed on a server: fresh state at version 1 with
    /// effective stats equal to the base.
    pub async fn download(
        &self,
        user_id: &str,
        server: &crate::models::Server,
        tool_name: &str,
    ) -> Result<UserToolState> {
        if !server.listed_tools.iter().any(|t| t == tool_name) {
            return Err(GameError::not_found(format!(
                "tool {} on server {}",
                tool_name, server.ip
            )));
        }
        let tool = self.catalog_tool(tool_name).await?;
        if self.store.get_tool_state(user_id, tool_name).await?.is_some() {
            return Err(GameError::conflict(format!("tool {} already owned", tool_name)));
        }
        let state = UserToolState {
            id: new_id(),
            user_id: user_id.to_string(),
            tool_id: tool.id.clone(),
            tool_name: tool.name.clone(),
            version: 1,
            applied_patches: Vec::new(),
            effective_exploits: tool.exploits.clone(),
            effective_resources: tool.cost,
        };
        self.store.add_user_tool(&state).await?;
        Ok(state)
    }

    pub async fn owned(&self, user_id: &str) -> Result<Vec<UserToolState>> {
        self.store.list_tool_states(user_id).await
    }

    pub async fn owns(&self, user_id: &str, tool_name: &str) -> Result<bool> {
        Ok(self.store.get_tool_state(user_id, tool_name).await?.is_some())
    }

    /// The single authoritative accessor for a user's tool capability and
    /// resource cost.
    pub async fn effective_tool(&self, user_id: &str, tool_name: &str) -> Result<EffectiveTool> {
        let state = self
            .store
            .get_tool_state(user_id, tool_name)
            .await?
            .ok_or_else(|| GameError::not_found(format!("owned tool {}", tool_name)))?;
        let tool = self.catalog_tool(tool_name).await?;
        Ok(EffectiveTool { tool, state })
    }

    pub async fn inventory_patches(&self, user_id: &str) -> Result<Vec<String>> {
        self.store.list_user_patches(user_id).await
    }

    pub async fn grant_patch(&self, user_id: &str, patch_name: &str) -> Result<()> {
        // Validate it exists in the catalog before granting.
        self.catalog_patch(patch_name).await?;
        self.store.add_user_patch(user_id, patch_name).await
    }

    /// Apply an owned patch to an owned tool: append to the ordered patch
    /// list, bump the version and recompute the cached effective stats.
    pub async fn apply_patch(
        &self,
        user_id: &str,
        patch_name: &str,
        tool_name: &str,
    ) -> Result<UserToolState> {
        let patch = self.catalog_patch(patch_name).await?;
        if patch.target_tool != tool_name {
            return Err(GameError::invalid(format!(
                "patch {} targets {}, not {}",
                patch_name, patch.target_tool, tool_name
            )));
        }
        if !self.store.user_owns_patch(user_id, patch_name).await? {
            return Err(GameError::not_found(format!("patch {} in inventory", patch_name)));
        }
        let mut state = self
            .store
            .get_tool_state(user_id, tool_name)
            .await?
            .ok_or_else(|| GameError::not_found(format!("owned tool {}", tool_name)))?;
        if state.applied_patches.iter().any(|p| p == patch_name) {
            return Err(GameError::conflict(format!("patch {} already applied", patch_name)));
        }

        let tool = self.catalog_tool(tool_name).await?;
        state.applied_patches.push(patch_name.to_string());
        state.version += 1;

        let mut exploits = tool.exploits.clone();
        let mut resources = tool.cost;
        for applied in &state.applied_patches {
            let p = self.catalog_patch(applied).await?;
            exploits = merge_exploits(&exploits, &p.exploits);
            resources = resources.plus(&p.resources).clamped();
        }
        state.effective_exploits = exploits;
        state.effective_resources = resources;

        self.store.update_tool_state(&state).await?;
        tracing::debug!(
            "🔧 {} patched {} to v{}",
            user_id,
            tool_name,
            state.version
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_secs, Server, ToolKind};
    use crate::types::Wallet;

    fn tool(name: &str, exploits: Vec<Exploit>, cost: Resources) -> Tool {
        Tool {
            id: new_id(),
            name: name.to_string(),
            description: String::new(),
            kind: ToolKind::Exploit,
            cost,
            exploits,
            service: Some("ssh".to_string()),
            is_patch: false,
        }
    }

    fn patch(name: &str, target: &str, exploits: Vec<Exploit>, resources: Resources) -> Patch {
        Patch {
            id: new_id(),
            name: name.to_string(),
            target_tool: target.to_string(),
            description: String::new(),
            exploits,
            resources,
        }
    }

    fn repo_with(tools: &[&str]) -> Server {
        Server {
            ip: "repo".to_string(),
            local_ip: "10.0.0.1".to_string(),
            security_level: 1,
            resources: Resources::new(1000, 1000.0, 64),
            used_resources: Resources::default(),
            wallet: Wallet::default(),
            listed_tools: tools.iter().map(|t| t.to_string()).collect(),
            connected_ips: Vec::new(),
            services: Vec::new(),
            roles: Vec::new(),
            filesystem: serde_json::json!({}),
            local_network: Vec::new(),
            parent_ip: None,
            created_at: now_secs(),
        }
    }

    async fn runtime() -> ToolRuntime {
        let store = Store::open("sqlite::memory:").await.unwrap();
        ToolRuntime::new(store)
    }

    #[tokio::test]
    async fn test_download_requires_listing() {
        let rt = runtime().await;
        rt.store
            .insert_tool(&tool("password_cracker", vec![Exploit::new("ssh", 10)], Resources::new(10, 5.0, 1)))
            .await
            .unwrap();

        let unlisted = repo_with(&[]);
        assert!(rt.download("u1", &unlisted, "password_cracker").await.is_err());

        let repo = repo_with(&["password_cracker"]);
        let state = rt.download("u1", &repo, "password_cracker").await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.effective_exploits, vec![Exploit::new("ssh", 10)]);

        // second download of the same tool conflicts
        assert!(matches!(
            rt.download("u1", &repo, "password_cracker").await,
            Err(GameError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_apply_recomputes_effective() {
        let rt = runtime().await;
        rt.store
            .insert_tool(&tool(
                "password_cracker",
                vec![Exploit::new("password_cracking", 10), Exploit::new("ssh", 10)],
                Resources::new(20, 10.0, 2),
            ))
            .await
            .unwrap();
        rt.store
            .insert_patch(&patch(
                "pass_patch_v2",
                "password_cracker",
                vec![Exploit::new("password_cracking", 20)],
                Resources::new(-30, 5.0, 0),
            ))
            .await
            .unwrap();
        let repo = repo_with(&["password_cracker"]);
        rt.download("u1", &repo, "password_cracker").await.unwrap();
        rt.grant_patch("u1", "pass_patch_v2").await.unwrap();

        let state = rt.apply_patch("u1", "pass_patch_v2", "password_cracker").await.unwrap();
        assert_eq!(state.version, 2);
        assert_eq!(state.applied_patches, vec!["pass_patch_v2".to_string()]);
        // per-type max with patch upgrade, untouched types carried over
        let pc = state.effective_exploits.iter().find(|e| e.kind == "password_cracking").unwrap();
        assert_eq!(pc.level, 20);
        let ssh = state.effective_exploits.iter().find(|e| e.kind == "ssh").unwrap();
        assert_eq!(ssh.level, 10);
        // negative cpu delta clamps at zero
        assert_eq!(state.effective_resources, Resources::new(0, 15.0, 2));

        // applying the same patch twice conflicts
        assert!(matches!(
            rt.apply_patch("u1", "pass_patch_v2", "password_cracker").await,
            Err(GameError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_requires_matching_target_and_inventory() {
        let rt = runtime().await;
        rt.store
            .insert_tool(&tool("sql_injector", vec![Exploit::new("sql_injection", 8)], Resources::new(5, 5.0, 1)))
            .await
            .unwrap();
        rt.store
            .insert_patch(&patch("pass_patch_v2", "password_cracker", vec![], Resources::default()))
            .await
            .unwrap();
        let repo = repo_with(&["sql_injector"]);
        rt.download("u1", &repo, "sql_injector").await.unwrap();

        assert!(matches!(
            rt.apply_patch("u1", "pass_patch_v2", "sql_injector").await,
            Err(GameError::InvalidArgument(_))
        ));
    }
}
