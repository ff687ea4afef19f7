use sqlx::any::AnyRow;
use sqlx::Row;

use super::{from_json, to_json, Store};
use crate::error::{GameError, Result};
use crate::models::User;
use crate::types::{Resources, Wallet};

fn row_to_user(row: &AnyRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        public_ip: row.try_get("public_ip")?,
        local_ip: row.try_get("local_ip")?,
        mac: row.try_get("mac")?,
        level: row.try_get("level")?,
        experience: row.try_get("experience")?,
        resources: from_json(&row.try_get::<String, _>("resources")?)?,
        wallet: from_json(&row.try_get::<String, _>("wallet")?)?,
        filesystem: from_json(&row.try_get::<String, _>("filesystem")?)?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO users
                (id, username, password_hash, public_ip, local_ip, mac,
                 level, experience, resources, wallet, filesystem, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.public_ip)
        .bind(&user.local_ip)
        .bind(&user.mac)
        .bind(user.level)
        .bind(user.experience)
        .bind(to_json(&user.resources)?)
        .bind(to_json(&user.wallet)?)
        .bind(to_json(&user.filesystem)?)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| GameError::not_found("user"))?;
        row_to_user(&row)
    }

    pub async fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn username_taken(&self, username: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS hit FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn rename_user(&self, id: &str, new_username: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET username = $1 WHERE id = $2")
            .bind(new_username)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GameError::not_found("user"));
        }
        Ok(())
    }

    /// Persist a home-filesystem overlay. Best-effort durable: callers log
    /// failures and keep the in-memory tree.
    pub async fn save_user_filesystem(&self, id: &str, overlay: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE users SET filesystem = $1 WHERE id = $2")
            .bind(to_json(overlay)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add experience and rederive the level, in one transaction so the
    /// `level == experience / 100` invariant holds at every commit point.
    pub async fn add_experience(&self, user_id: &str, amount: i64) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT experience FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GameError::not_found("user"))?;
        let experience: i64 = row.try_get("experience")?;
        let experience = experience + amount;
        let level = User::level_for(experience);
        sqlx::query("UPDATE users SET experience = $1, level = $2 WHERE id = $3")
            .bind(experience)
            .bind(level)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(experience)
    }

    pub async fn update_user_wallet(&self, user_id: &str, wallet: &Wallet) -> Result<()> {
        sqlx::query("UPDATE users SET wallet = $1 WHERE id = $2")
            .bind(to_json(wallet)?)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_user_resources(&self, user_id: &str, resources: &Resources) -> Result<()> {
        sqlx::query("UPDATE users SET resources = $1 WHERE id = $2")
            .bind(to_json(resources)?)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
