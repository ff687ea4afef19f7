/// Persisted record types
///
/// One struct per store table. Structured fields (resources, wallets,
/// service lists, filesystem overlays) are kept as typed values here and
/// serialized to JSON TEXT columns by the store layer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Exploit, Resources, Role, Service, Wallet};

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

static LAST_MILLIS: std::sync::atomic::AtomicI64 = std::sync::atomic::AtomicI64::new(0);

/// Millisecond timestamp, strictly increasing within the process. Keeps
/// ring-buffer trim ordering stable for same-millisecond bursts.
pub fn next_millis() -> i64 {
    use std::sync::atomic::Ordering;
    let now = Utc::now().timestamp_millis();
    let mut prev = LAST_MILLIS.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev + 1);
        match LAST_MILLIS.compare_exchange(prev, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    /// Generated public address, a.b.c.d with a and d in [1, 255].
    pub public_ip: String,
    /// Generated 10.b.c.d address.
    pub local_ip: String,
    /// Locally administered MAC.
    pub mac: String,
    pub level: i64,
    pub experience: i64,
    pub resources: Resources,
    pub wallet: Wallet,
    /// Persisted home-filesystem overlay (non-skeleton subset).
    pub filesystem: serde_json::Value,
    pub created_at: i64,
}

impl User {
    /// level is derived: floor(experience / 100).
    pub fn level_for(experience: i64) -> i64 {
        experience / 100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Domain key: "repo", a numeric IPv4, or the synthetic id chosen at
    /// creation.
    pub ip: String,
    pub local_ip: String,
    pub security_level: i64,
    pub resources: Resources,
    pub used_resources: Resources,
    pub wallet: Wallet,
    /// Tool names downloadable from this server.
    #[serde(default)]
    pub listed_tools: Vec<String>,
    /// Neighbor list shown by `scan` from inside this server.
    #[serde(default)]
    pub connected_ips: Vec<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Persisted filesystem overlay.
    #[serde(default)]
    pub filesystem: serde_json::Value,
    /// Child ips reachable one hop down. References into the flat server
    /// table, never embedded records.
    #[serde(default)]
    pub local_network: Vec<String>,
    /// Set for servers living inside another server's local network;
    /// None for top-level servers shown by a root `scan`.
    #[serde(default)]
    pub parent_ip: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Single-service exploit (password_cracker, ssh_exploit, ...).
    Exploit,
    /// Applies to every vulnerable service (exploit_kit, ...).
    MultiExploit,
    /// crypto_miner.
    Miner,
    /// Info gathering, ownership only (user_enum, sniffers, ...).
    Info,
    /// Requires a prior exploitation on the target.
    Rootkit,
}

impl ToolKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ToolKind::Exploit => "exploit",
            ToolKind::MultiExploit => "multi_exploit",
            ToolKind::Miner => "miner",
            ToolKind::Info => "info",
            ToolKind::Rootkit => "rootkit",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "exploit" => Some(ToolKind::Exploit),
            "multi_exploit" => Some(ToolKind::MultiExploit),
            "miner" => Some(ToolKind::Miner),
            "info" => Some(ToolKind::Info),
            "rootkit" => Some(ToolKind::Rootkit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    /// Base resource cost.
    pub cost: Resources,
    /// Base exploit capabilities.
    #[serde(default)]
    pub exploits: Vec<Exploit>,
    /// Targeted service name; None means the tool is not service-bound.
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub is_patch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub id: String,
    pub name: String,
    pub target_tool: String,
    pub description: String,
    /// Exploit upgrades, merged per-type-max over the base tool.
    #[serde(default)]
    pub exploits: Vec<Exploit>,
    /// Resource deltas; may be negative (optimizations).
    #[serde(default)]
    pub resources: Resources,
}

/// Per-user per-tool state: version counter, ordered applied patches and the
/// cached effective stats recomputed on every patch apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToolState {
    pub id: String,
    pub user_id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub version: i64,
    #[serde(default)]
    pub applied_patches: Vec<String>,
    #[serde(default)]
    pub effective_exploits: Vec<Exploit>,
    pub effective_resources: Resources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exploitation {
    pub id: String,
    pub user_id: String,
    /// Dot-form path with `.localNetwork.` between hops.
    pub server_path: String,
    pub service_name: String,
    /// The matched subset of exploits used.
    #[serde(default)]
    pub exploits: Vec<Exploit>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMiner {
    pub id: String,
    pub user_id: String,
    pub server_ip: String,
    /// Copied from the effective crypto_miner at start; never reread.
    pub reservation: Resources,
    /// Millisecond timestamp; advanced on every granted tick.
    pub started_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopType {
    Repo,
    Tools,
    Resources,
    Mixed,
}

impl ShopType {
    pub fn tag(&self) -> &'static str {
        match self {
            ShopType::Repo => "repo",
            ShopType::Tools => "tools",
            ShopType::Resources => "resources",
            ShopType::Mixed => "mixed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "repo" => Some(ShopType::Repo),
            "tools" => Some(ShopType::Tools),
            "resources" => Some(ShopType::Resources),
            "mixed" => Some(ShopType::Mixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: String,
    pub server_ip: String,
    #[serde(rename = "type")]
    pub shop_type: ShopType,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopItemType {
    Tool,
    Patch,
    Resource,
}

impl ShopItemType {
    pub fn tag(&self) -> &'static str {
        match self {
            ShopItemType::Tool => "tool",
            ShopItemType::Patch => "patch",
            ShopItemType::Resource => "resource",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "tool" => Some(ShopItemType::Tool),
            "patch" => Some(ShopItemType::Patch),
            "resource" => Some(ShopItemType::Resource),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopItem {
    pub id: String,
    pub shop_id: String,
    #[serde(rename = "type")]
    pub item_type: ShopItemType,
    pub name: String,
    pub description: String,
    pub price_crypto: f64,
    pub price_data: f64,
    /// -1 means unlimited.
    pub stock: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub shop_id: String,
    pub item_id: String,
    pub price_crypto: f64,
    pub price_data: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Public,
    Private,
    Password,
}

impl RoomType {
    pub fn tag(&self) -> &'static str {
        match self {
            RoomType::Public => "public",
            RoomType::Private => "private",
            RoomType::Password => "password",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "public" => Some(RoomType::Public),
            "private" => Some(RoomType::Private),
            "password" => Some(RoomType::Password),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    /// Empty unless `room_type == Password`.
    pub password_hash: String,
    pub created_by: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    /// None for system messages.
    pub user_id: Option<String>,
    pub username: String,
    pub content: String,
    /// Millisecond timestamp; trim ordering within a room.
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub username: String,
    /// "ssh" or "ws".
    pub transport: String,
    pub connected_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tutorial {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_derivation() {
        assert_eq!(User::level_for(0), 0);
        assert_eq!(User::level_for(99), 0);
        assert_eq!(User::level_for(100), 1);
        assert_eq!(User::level_for(1050), 10);
    }

    #[test]
    fn test_model_json_shapes() {
        let item: ShopItem = serde_json::from_str(
            r#"{"id":"i","shop_id":"s","type":"resource","name":"cpu_boost",
                "description":"","price_crypto":5.0,"price_data":0.0,"stock":-1}"#,
        )
        .unwrap();
        assert_eq!(item.item_type, ShopItemType::Resource);
        assert_eq!(item.stock, -1);

        let room_type: RoomType = serde_json::from_str("\"password\"").unwrap();
        assert_eq!(room_type, RoomType::Password);
    }
}
