/// Shop engine
///
/// One shop per server; items are tools (become downloadable at the shop's
/// server), patches (land in the buyer's inventory) or resource boosts
/// (fixed deltas). Purchases run in a single store transaction.

use crate::error::{GameError, Result};
use crate::models::{Shop, ShopItem, ShopItemType};
use crate::store::{Fulfillment, Store};
use crate::types::Resources;

/// Built-in resource boost table.
const RESOURCE_BOOSTS: &[(&str, Resources)] = &[
    ("cpu_boost", Resources { cpu: 50, bandwidth: 0.0, ram: 0 }),
    ("bandwidth_boost", Resources { cpu: 0, bandwidth: 50.0, ram: 0 }),
    ("ram_boost", Resources { cpu: 0, bandwidth: 0.0, ram: 8 }),
    ("full_boost", Resources { cpu: 100, bandwidth: 100.0, ram: 16 }),
];

pub fn boost_delta(name: &str) -> Option<Resources> {
    RESOURCE_BOOSTS
        .iter()
        .find(|(boost, _)| *boost == name)
        .map(|(_, delta)| *delta)
}

pub struct ShopEngine {
    store: Store,
}

impl ShopEngine {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_shops(&self) -> Result<Vec<Shop>> {
        self.store.list_shops().await
    }

    /// Resolve by shop id, shop name or the ip of the server hosting it.
    pub async fn find_shop(&self, key: &str) -> Result<Shop> {
        if let Some(shop) = self.store.get_shop(key).await? {
            return Ok(shop);
        }
        if let Some(shop) = self.store.get_shop_by_server(key).await? {
            return Ok(shop);
        }
        let shops = self.store.list_shops().await?;
        shops
            .into_iter()
            .find(|s| s.name == key)
            .ok_or_else(|| GameError::not_found(format!("shop {}", key)))
    }

    pub async fn browse(&self, shop: &Shop) -> Result<Vec<ShopItem>> {
        self.store.list_shop_items(&shop.id).await
    }

    /// Buy by 1-based item index as rendered by `shop <id>`.
    pub async fn purchase(&self, user_id: &str, shop: &Shop, item_index: usize) -> Result<ShopItem> {
        let items = self.browse(shop).await?;
        if item_index == 0 || item_index > items.len() {
            return Err(GameError::invalid(format!(
                "item number must be 1-{}",
                items.len()
            )));
        }
        let item = &items[item_index - 1];

        let fulfillment = match item.item_type {
            ShopItemType::Tool => Fulfillment::ListTool {
                server_ip: shop.server_ip.clone(),
                tool_name: item.name.clone(),
            },
            ShopItemType::Patch => Fulfillment::GrantPatch { patch_name: item.name.clone() },
            ShopItemType::Resource => {
                let delta = boost_delta(&item.name).ok_or_else(|| {
                    GameError::internal(format!("unknown resource boost {}", item.name))
                })?;
                Fulfillment::AddResources { delta }
            }
        };

        let bought = self
            .store
            .execute_purchase(user_id, &shop.id, &item.id, fulfillment)
            .await?;
        tracing::info!("🛒 {} bought {} at {}", user_id, bought.name, shop.name);
        Ok(bought)
    }
}

/// Stock rendering used by the shop listing.
pub fn stock_label(stock: i64) -> String {
    if stock < 0 {
        "∞".to_string()
    } else {
        stock.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{new_id, now_secs, Patch, Server, ShopType, User};
    use crate::types::Wallet;

    struct Rig {
        engine: ShopEngine,
        store: Store,
        shop: Shop,
    }

    async fn rig() -> Rig {
        let store = Store::open("sqlite::memory:").await.unwrap();
        let engine = ShopEngine::new(store.clone());

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
                created_at: now_secs(),
            })
            .await
            .unwrap();
        store
            .insert_server(&Server {
                ip: "2.2.2.2".to_string(),
                local_ip: "10.0.0.2".to_string(),
                security_level: 10,
                resources: Resources::new(100, 100.0, 8),
                used_resources: Resources::default(),
                wallet: Wallet::default(),
                listed_tools: Vec::new(),
                connected_ips: Vec::new(),
                services: Vec::new(),
                roles: Vec::new(),
                filesystem: serde_json::json!({}),
                local_network: Vec::new(),
                parent_ip: None,
                created_at: now_secs(),
            })
            .await
            .unwrap();
        store
            .insert_patch(&Patch {
                id: new_id(),
                name: "pass_patch_v2".to_string(),
                target_tool: "password_cracker".to_string(),
                description: String::new(),
                exploits: Vec::new(),
                resources: Resources::default(),
            })
            .await
            .unwrap();

        let shop = Shop {
            id: new_id(),
            server_ip: "2.2.2.2".to_string(),
            shop_type: ShopType::Mixed,
            name: "blackmarket".to_string(),
            description: "everything".to_string(),
        };
        store.insert_shop(&shop).await.unwrap();
        for (idx, (item_type, name, crypto, data, stock)) in [
            (ShopItemType::Tool, "sql_injector", 5.0, 0.0, -1),
            (ShopItemType::Patch, "pass_patch_v2", 10.0, 100.0, 1),
            (ShopItemType::Resource, "cpu_boost", 0.0, 400.0, -1),
            (ShopItemType::Resource, "ram_boost", 100.0, 0.0, -1),
        ]
        .into_iter()
        .enumerate()
        {
            store
                .insert_shop_item(&ShopItem {
                    id: format!("item-{}", idx),
                    shop_id: shop.id.clone(),
                    item_type,
                    name: name.to_string(),
                    description: String::new(),
                    price_crypto: crypto,
                    price_data: data,
                    stock,
                })
                .await
                .unwrap();
        }

        Rig { engine, store, shop }
    }

    fn index_of(items: &[ShopItem], name: &str) -> usize {
        items.iter().position(|i| i.name == name).unwrap() + 1
    }

    #[tokio::test]
    async fn test_purchase_patch_debits_and_grants() {
        let rig = rig().await;
        let items = rig.engine.browse(&rig.shop).await.unwrap();
        let idx = index_of(&items, "pass_patch_v2");

        rig.engine.purchase("u1", &rig.shop, idx).await.unwrap();
        let user = rig.store.get_user("u1").await.unwrap();
        assert_eq!(user.wallet.crypto, 5.0);
        assert_eq!(user.wallet.data, 1100.0);
        assert!(rig.store.user_owns_patch("u1", "pass_patch_v2").await.unwrap());

        // finite stock hit zero; a rebuy is rejected and nothing is debited
        let err = rig.engine.purchase("u1", &rig.shop, idx).await.unwrap_err();
        assert!(matches!(err, GameError::Conflict(_)));
        let user = rig.store.get_user("u1").await.unwrap();
        assert_eq!(user.wallet.crypto, 5.0);
    }

    #[tokio::test]
    async fn test_purchase_tool_lists_it_on_server() {
        let rig = rig().await;
        let items = rig.engine.browse(&rig.shop).await.unwrap();
        rig.engine
            .purchase("u1", &rig.shop, index_of(&items, "sql_injector"))
            .await
            .unwrap();
        let server = rig.store.get_server("2.2.2.2").await.unwrap().unwrap();
        assert!(server.listed_tools.contains(&"sql_injector".to_string()));
    }

    #[tokio::test]
    async fn test_purchase_resource_boost() {
        let rig = rig().await;
        let items = rig.engine.browse(&rig.shop).await.unwrap();
        rig.engine
            .purchase("u1", &rig.shop, index_of(&items, "cpu_boost"))
            .await
            .unwrap();
        let user = rig.store.get_user("u1").await.unwrap();
        assert_eq!(user.resources.cpu, 250);
        assert_eq!(user.wallet.data, 800.0);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_state_unchanged() {
        let rig = rig().await;
        let items = rig.engine.browse(&rig.shop).await.unwrap();
        // ram_boost costs 100 crypto; the user has 15
        let err = rig
            .engine
            .purchase("u1", &rig.shop, index_of(&items, "ram_boost"))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InsufficientFunds));
        let user = rig.store.get_user("u1").await.unwrap();
        assert_eq!(user.wallet.crypto, 15.0);
        assert_eq!(user.resources.ram, 24);
        let items = rig.engine.browse(&rig.shop).await.unwrap();
        assert_eq!(items.iter().find(|i| i.name == "ram_boost").unwrap().stock, -1);
    }

    #[tokio::test]
    async fn test_find_shop_by_name_id_or_server() {
        let rig = rig().await;
        assert_eq!(rig.engine.find_shop("blackmarket").await.unwrap().id, rig.shop.id);
        assert_eq!(rig.engine.find_shop(&rig.shop.id).await.unwrap().id, rig.shop.id);
        assert_eq!(rig.engine.find_shop("2.2.2.2").await.unwrap().id, rig.shop.id);
        assert!(rig.engine.find_shop("nope").await.is_err());
    }
}
