use sqlx::any::AnyRow;
use sqlx::Row;

use super::{from_json, to_json, Store};
use crate::error::{GameError, Result};
use crate::models::{new_id, now_secs, Shop, ShopItem, ShopItemType, ShopType};
use crate::types::{Resources, Wallet};

fn row_to_shop(row: &AnyRow) -> Result<Shop> {
    let type_tag: String = row.try_get("shop_type")?;
    Ok(Shop {
        id: row.try_get("id")?,
        server_ip: row.try_get("server_ip")?,
        shop_type: ShopType::from_tag(&type_tag)
            .ok_or_else(|| GameError::internal(format!("unknown shop type {}", type_tag)))?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn row_to_item(row: &AnyRow) -> Result<ShopItem> {
    let type_tag: String = row.try_get("item_type")?;
    Ok(ShopItem {
        id: row.try_get("id")?,
        shop_id: row.try_get("shop_id")?,
        item_type: ShopItemType::from_tag(&type_tag)
            .ok_or_else(|| GameError::internal(format!("unknown item type {}", type_tag)))?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price_crypto: row.try_get("price_crypto")?,
        price_data: row.try_get("price_data")?,
        stock: row.try_get("stock")?,
    })
}

/// What a successful purchase delivers, applied inside the purchase
/// transaction.
pub enum Fulfillment {
    /// Tool becomes downloadable at the shop's server.
    ListTool { server_ip: String, tool_name: String },
    /// Patch lands in the buyer's inventory.
    GrantPatch { patch_name: String },
    /// Fixed resource deltas added to the buyer.
    AddResources { delta: Resources },
}

impl Store {
    pub async fn insert_shop(&self, shop: &Shop) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO shops (id, server_ip, shop_type, name, description)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&shop.id)
        .bind(&shop.server_ip)
        .bind(shop.shop_type.tag())
        .bind(&shop.name)
        .bind(&shop.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_shop_item(&self, item: &ShopItem) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO shop_items
                (id, shop_id, item_type, name, description, price_crypto, price_data, stock)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&item.id)
        .bind(&item.shop_id)
        .bind(item.item_type.tag())
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.price_crypto)
        .bind(item.price_data)
        .bind(item.stock)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_shops(&self) -> Result<Vec<Shop>> {
        let rows = sqlx::query("SELECT * FROM shops ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_shop).collect()
    }

    pub async fn get_shop(&self, shop_id: &str) -> Result<Option<Shop>> {
        let row = sqlx::query("SELECT * FROM shops WHERE id = $1")
            .bind(shop_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_shop).transpose()
    }

    pub async fn get_shop_by_server(&self, server_ip: &str) -> Result<Option<Shop>> {
        let row = sqlx::query("SELECT * FROM shops WHERE server_ip = $1")
            .bind(server_ip)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_shop).transpose()
    }

    pub async fn list_shop_items(&self, shop_id: &str) -> Result<Vec<ShopItem>> {
        let rows = sqlx::query("SELECT * FROM shop_items WHERE shop_id = $1 ORDER BY name")
            .bind(shop_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    pub async fn count_shops(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM shops")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// The whole §purchase contract in one transaction: stock and wallet are
    /// rechecked against current rows, the wallet is debited, finite stock
    /// decremented, the purchase recorded and the item fulfilled. Any
    /// failure rolls the lot back, so a retry never observes a partial
    /// debit.
    pub async fn execute_purchase(
        &self,
        user_id: &str,
        shop_id: &str,
        item_id: &str,
        fulfillment: Fulfillment,
    ) -> Result<ShopItem> {
        let mut tx = self.pool.begin().await?;

        let item_row = sqlx::query("SELECT * FROM shop_items WHERE shop_id = $1 AND id = $2")
            .bind(shop_id)
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GameError::not_found("shop item"))?;
        let item = row_to_item(&item_row)?;

        if item.stock == 0 {
            return Err(GameError::conflict(format!("{} is out of stock", item.name)));
        }

        let user_row = sqlx::query("SELECT wallet, resources FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GameError::not_found("user"))?;
        let mut wallet: Wallet = from_json(&user_row.try_get::<String, _>("wallet")?)?;
        if !wallet.can_afford(item.price_crypto, item.price_data) {
            return Err(GameError::InsufficientFunds);
        }
        wallet.crypto -= item.price_crypto;
        wallet.data -= item.price_data;
        sqlx::query("UPDATE users SET wallet = $1 WHERE id = $2")
            .bind(to_json(&wallet)?)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if item.stock > 0 {
            sqlx::query(
                "UPDATE shop_items SET stock = stock - 1 WHERE shop_id = $1 AND id = $2",
            )
            .bind(shop_id)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"INSERT INTO user_purchases
                (id, user_id, shop_id, item_id, price_crypto, price_data, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(shop_id)
        .bind(item_id)
        .bind(item.price_crypto)
        .bind(item.price_data)
        .bind(now_secs())
        .execute(&mut *tx)
        .await?;

        match fulfillment {
            Fulfillment::ListTool { server_ip, tool_name } => {
                let server_row = sqlx::query("SELECT listed_tools FROM servers WHERE ip = $1")
                    .bind(&server_ip)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| GameError::not_found("server"))?;
                let mut listed: Vec<String> =
                    from_json(&server_row.try_get::<String, _>("listed_tools")?)?;
                if !listed.contains(&tool_name) {
                    listed.push(tool_name);
                }
                sqlx::query("UPDATE servers SET listed_tools = $1 WHERE ip = $2")
                    .bind(to_json(&listed)?)
                    .bind(&server_ip)
                    .execute(&mut *tx)
                    .await?;
            }
            Fulfillment::GrantPatch { patch_name } => {
                sqlx::query(
                    r#"INSERT INTO user_patches (user_id, patch_name, acquired_at)
                       VALUES ($1, $2, $3)"#,
                )
                .bind(user_id)
                .bind(&patch_name)
                .bind(now_secs())
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                        GameError::conflict(format!("patch {} already owned", patch_name))
                    }
                    other => GameError::from(other),
                })?;
            }
            Fulfillment::AddResources { delta } => {
                let mut resources: Resources =
                    from_json(&user_row.try_get::<String, _>("resources")?)?;
                resources = resources.plus(&delta);
                sqlx::query("UPDATE users SET resources = $1 WHERE id = $2")
                    .bind(to_json(&resources)?)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(item)
    }
}
