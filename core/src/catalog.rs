/// Catalog seeding
///
/// One-shot load of tools, patches, servers, shops and tutorials at boot.
/// Each table is seeded if and only if it is empty, so reboots never
/// duplicate or clobber live state. The seed is JSON with one array per
/// resource; an on-disk file (SEED_PATH) overrides the embedded default.

use serde::Deserialize;

use crate::error::{GameError, Result};
use crate::models::{
    new_id, now_secs, Patch, Server, Shop, ShopItem, ShopItemType, ShopType, Tool, ToolKind,
    Tutorial,
};
use crate::store::Store;
use crate::types::{Resources, Role, Service, Wallet};

const DEFAULT_SEED: &str = include_str!("../data/seed.json");

#[derive(Debug, Deserialize)]
struct ToolSeed {
    name: String,
    description: String,
    kind: ToolKind,
    cost: Resources,
    #[serde(default)]
    exploits: Vec<crate::types::Exploit>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    is_patch: bool,
}

#[derive(Debug, Deserialize)]
struct PatchSeed {
    name: String,
    target_tool: String,
    description: String,
    #[serde(default)]
    exploits: Vec<crate::types::Exploit>,
    #[serde(default)]
    resources: Resources,
}

#[derive(Debug, Deserialize)]
struct ServerSeed {
    ip: String,
    local_ip: String,
    security_level: i64,
    resources: Resources,
    #[serde(default)]
    wallet: Wallet,
    #[serde(default)]
    listed_tools: Vec<String>,
    #[serde(default)]
    connected_ips: Vec<String>,
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    roles: Vec<Role>,
    #[serde(default)]
    local_network: Vec<String>,
    #[serde(default)]
    parent_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShopItemSeed {
    #[serde(rename = "type")]
    item_type: ShopItemType,
    name: String,
    description: String,
    price_crypto: f64,
    price_data: f64,
    #[serde(default = "unlimited")]
    stock: i64,
}

fn unlimited() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct ShopSeed {
    server_ip: String,
    #[serde(rename = "type")]
    shop_type: ShopType,
    name: String,
    description: String,
    #[serde(default)]
    items: Vec<ShopItemSeed>,
}

#[derive(Debug, Deserialize)]
struct SeedData {
    #[serde(default)]
    tools: Vec<ToolSeed>,
    #[serde(default)]
    patches: Vec<PatchSeed>,
    #[serde(default)]
    servers: Vec<ServerSeed>,
    #[serde(default)]
    shops: Vec<ShopSeed>,
    #[serde(default)]
    tutorials: Vec<Tutorial>,
}

/// In-memory catalog state kept after seeding; tutorials have no table.
pub struct Catalog {
    pub tutorials: Vec<Tutorial>,
}

impl Catalog {
    pub fn tutorial(&self, id: &str) -> Option<&Tutorial> {
        self.tutorials.iter().find(|t| t.id == id)
    }
}

/// Load the seed and populate any empty tables.
pub async fn seed(store: &Store, seed_path: Option<&str>) -> Result<Catalog> {
    let text = match seed_path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| GameError::internal(format!("seed file {}: {}", path, e)))?,
        None => DEFAULT_SEED.to_string(),
    };
    let data: SeedData =
        serde_json::from_str(&text).map_err(|e| GameError::internal(format!("seed parse: {}", e)))?;

    if store.count_tools().await? == 0 {
        for seed in &data.tools {
            store
                .insert_tool(&Tool {
                    id: new_id(),
                    name: seed.name.clone(),
                    description: seed.description.clone(),
                    kind: seed.kind,
                    cost: seed.cost,
                    exploits: seed.exploits.clone(),
                    service: seed.service.clone(),
                    is_patch: seed.is_patch,
                })
                .await?;
        }
        tracing::info!("🌱 Seeded {} tools", data.tools.len());
    }

    if store.count_patches().await? == 0 {
        for seed in &data.patches {
            store
                .insert_patch(&Patch {
                    id: new_id(),
                    name: seed.name.clone(),
                    target_tool: seed.target_tool.clone(),
                    description: seed.description.clone(),
                    exploits: seed.exploits.clone(),
                    resources: seed.resources,
                })
                .await?;
        }
        tracing::info!("🌱 Seeded {} patches", data.patches.len());
    }

    if store.count_servers().await? == 0 {
        for seed in &data.servers {
            store
                .insert_server(&Server {
                    ip: seed.ip.clone(),
                    local_ip: seed.local_ip.clone(),
                    security_level: seed.security_level,
                    resources: seed.resources,
                    used_resources: Resources::default(),
                    wallet: seed.wallet,
                    listed_tools: seed.listed_tools.clone(),
                    connected_ips: seed.connected_ips.clone(),
                    services: seed.services.clone(),
                    roles: seed.roles.clone(),
                    filesystem: serde_json::json!({}),
                    local_network: seed.local_network.clone(),
                    parent_ip: seed.parent_ip.clone(),
                    created_at: now_secs(),
                })
                .await?;
        }
        tracing::info!("🌱 Seeded {} servers", data.servers.len());
    }

    if store.count_shops().await? == 0 {
        for seed in &data.shops {
            let shop = Shop {
                id: new_id(),
                server_ip: seed.server_ip.clone(),
                shop_type: seed.shop_type,
                name: seed.name.clone(),
                description: seed.description.clone(),
            };
            store.insert_shop(&shop).await?;
            for item in &seed.items {
                store
                    .insert_shop_item(&ShopItem {
                        id: new_id(),
                        shop_id: shop.id.clone(),
                        item_type: item.item_type,
                        name: item.name.clone(),
                        description: item.description.clone(),
                        price_crypto: item.price_crypto,
                        price_data: item.price_data,
                        stock: item.stock,
                    })
                    .await?;
            }
        }
        tracing::info!("🌱 Seeded {} shops", data.shops.len());
    }

    Ok(Catalog { tutorials: data.tutorials })
}
