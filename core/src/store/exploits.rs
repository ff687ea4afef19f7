use sqlx::any::AnyRow;
use sqlx::Row;

use super::{from_json, to_json, Store};
use crate::error::{GameError, Result};
use crate::models::{Exploitation, User};

fn row_to_exploitation(row: &AnyRow) -> Result<Exploitation> {
    Ok(Exploitation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        server_path: row.try_get("server_path")?,
        service_name: row.try_get("service_name")?,
        exploits: from_json(&row.try_get::<String, _>("exploits")?)?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    /// Upsert the exploitation row and grant the XP in one transaction;
    /// a store failure reverts both.
    pub async fn record_exploitation(&self, exploitation: &Exploitation, xp: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO exploitations
                (id, user_id, server_path, service_name, exploits, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (user_id, server_path, service_name)
               DO UPDATE SET exploits = EXCLUDED.exploits, created_at = EXCLUDED.created_at"#,
        )
        .bind(&exploitation.id)
        .bind(&exploitation.user_id)
        .bind(&exploitation.server_path)
        .bind(&exploitation.service_name)
        .bind(to_json(&exploitation.exploits)?)
        .bind(exploitation.created_at)
        .execute(&mut *tx)
        .await?;

        if xp > 0 {
            let row = sqlx::query("SELECT experience FROM users WHERE id = $1")
                .bind(&exploitation.user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| GameError::not_found("user"))?;
            let experience: i64 = row.try_get::<i64, _>("experience")? + xp;
            sqlx::query("UPDATE users SET experience = $1, level = $2 WHERE id = $3")
                .bind(experience)
                .bind(User::level_for(experience))
                .bind(&exploitation.user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_exploitations(&self, user_id: &str) -> Result<Vec<Exploitation>> {
        let rows = sqlx::query(
            "SELECT * FROM exploitations WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_exploitation).collect()
    }

    /// SSH gate: any exploited service on the path grants access.
    pub async fn has_exploitation(&self, user_id: &str, server_path: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM exploitations WHERE user_id = $1 AND server_path = $2",
        )
        .bind(user_id)
        .bind(server_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
