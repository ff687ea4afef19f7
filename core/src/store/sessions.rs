use sqlx::any::AnyRow;
use sqlx::Row;

use super::Store;
use crate::error::{GameError, Result};
use crate::models::SessionRecord;

fn row_to_session(row: &AnyRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        transport: row.try_get("transport")?,
        connected_at: row.try_get("connected_at")?,
    })
}

impl Store {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sessions (id, user_id, username, transport, connected_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.username)
        .bind(&session.transport)
        .bind(session.connected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY connected_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_session).collect()
    }

    /// Stale rows from a previous process are dropped at boot; session rows
    /// only describe live connections of this process.
    pub async fn clear_sessions(&self) -> Result<()> {
        sqlx::query("DELETE FROM sessions")
            .execute(&self.pool)
            .await
            .map_err(GameError::from)?;
        Ok(())
    }
}
