use sqlx::any::AnyRow;
use sqlx::Row;

use super::{from_json, to_json, Store};
use crate::error::{GameError, Result};
use crate::models::{ActiveMiner, Server};
use crate::types::Wallet;

fn row_to_miner(row: &AnyRow) -> Result<ActiveMiner> {
    Ok(ActiveMiner {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        server_ip: row.try_get("server_ip")?,
        reservation: from_json(&row.try_get::<String, _>("reservation")?)?,
        started_at: row.try_get("started_at")?,
    })
}

impl Store {
    /// Persist the reservation and the miner row atomically: the server's
    /// updated `used_resources` and the new ActiveMiner commit together.
    pub async fn start_miner(&self, server: &Server, miner: &ActiveMiner) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE servers SET used_resources = $1 WHERE ip = $2")
            .bind(to_json(&server.used_resources)?)
            .bind(&server.ip)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO active_miners (id, user_id, server_ip, reservation, started_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&miner.id)
        .bind(&miner.user_id)
        .bind(&miner.server_ip)
        .bind(to_json(&miner.reservation)?)
        .bind(miner.started_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                GameError::conflict("already mining on this server")
            }
            other => GameError::from(other),
        })?;
        tx.commit().await?;
        Ok(())
    }

    /// Release the reservation and delete the miner row atomically.
    pub async fn stop_miner(&self, server: &Server, miner_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE servers SET used_resources = $1 WHERE ip = $2")
            .bind(to_json(&server.used_resources)?)
            .bind(&server.ip)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM active_miners WHERE id = $1")
            .bind(miner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Row-only delete, for recovery paths where the server-side accounting
    /// is rebuilt separately.
    pub async fn delete_miner(&self, miner_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM active_miners WHERE id = $1")
            .bind(miner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_miner(&self, user_id: &str, server_ip: &str) -> Result<Option<ActiveMiner>> {
        let row = sqlx::query(
            "SELECT * FROM active_miners WHERE user_id = $1 AND server_ip = $2",
        )
        .bind(user_id)
        .bind(server_ip)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_miner).transpose()
    }

    pub async fn list_miners(&self, user_id: &str) -> Result<Vec<ActiveMiner>> {
        let rows = sqlx::query(
            "SELECT * FROM active_miners WHERE user_id = $1 ORDER BY started_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_miner).collect()
    }

    pub async fn list_all_miners(&self) -> Result<Vec<ActiveMiner>> {
        let rows = sqlx::query("SELECT * FROM active_miners ORDER BY started_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_miner).collect()
    }

    /// One reward tick for one miner: credit the wallet and advance the
    /// miner's clock together. A failure leaves `started_at` untouched so
    /// the skipped interval is granted by a later tick.
    pub async fn grant_mining_reward(
        &self,
        miner_id: &str,
        user_id: &str,
        reward: f64,
        new_started_at: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT wallet FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| GameError::not_found("user"))?;
        let mut wallet: Wallet = from_json(&row.try_get::<String, _>("wallet")?)?;
        wallet.crypto += reward;
        sqlx::query("UPDATE users SET wallet = $1 WHERE id = $2")
            .bind(to_json(&wallet)?)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query("UPDATE active_miners SET started_at = $1 WHERE id = $2")
            .bind(new_started_at)
            .bind(miner_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            // Miner stopped between enumeration and grant; drop the tick.
            return Err(GameError::not_found("active miner"));
        }
        tx.commit().await?;
        Ok(())
    }
}
