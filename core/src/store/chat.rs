use sqlx::any::AnyRow;
use sqlx::Row;

use super::Store;
use crate::error::{GameError, Result};
use crate::models::{ChatMessage, ChatRoom, RoomType};

/// Per-room history ring size.
pub const ROOM_HISTORY_LIMIT: i64 = 100;

fn row_to_room(row: &AnyRow) -> Result<ChatRoom> {
    let type_tag: String = row.try_get("room_type")?;
    Ok(ChatRoom {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        room_type: RoomType::from_tag(&type_tag)
            .ok_or_else(|| GameError::internal(format!("unknown room type {}", type_tag)))?,
        password_hash: row.try_get("password_hash")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_message(row: &AnyRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    /// Create the room with its creator as first member, atomically.
    pub async fn insert_room(&self, room: &ChatRoom) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO chat_rooms (id, name, room_type, password_hash, created_by, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(room.room_type.tag())
        .bind(&room.password_hash)
        .bind(&room.created_by)
        .bind(room.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                GameError::conflict(format!("room {} already exists", room.name))
            }
            other => GameError::from(other),
        })?;
        sqlx::query(
            "INSERT INTO chat_room_members (room_id, user_id, joined_at) VALUES ($1, $2, $3)",
        )
        .bind(&room.id)
        .bind(&room.created_by)
        .bind(room.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_rooms(&self) -> Result<Vec<ChatRoom>> {
        let rows = sqlx::query("SELECT * FROM chat_rooms ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_room).collect()
    }

    pub async fn add_room_member(&self, room_id: &str, user_id: &str, joined_at: i64) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO chat_room_members (room_id, user_id, joined_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (room_id, user_id) DO NOTHING"#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_room_member(&self, room_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chat_room_members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_room_members(&self, room_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT user_id FROM chat_room_members WHERE room_id = $1 ORDER BY joined_at",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("user_id").map_err(GameError::from))
            .collect()
    }

    pub async fn list_all_room_members(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT room_id, user_id FROM chat_room_members")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Ok((
                    r.try_get::<String, _>("room_id")?,
                    r.try_get::<String, _>("user_id")?,
                ))
            })
            .collect()
    }

    /// Append a message and trim the room's ring down to the newest
    /// `ROOM_HISTORY_LIMIT`, in one transaction.
    pub async fn append_chat_message(&self, message: &ChatMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO chat_messages (id, room_id, user_id, username, content, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&message.id)
        .bind(&message.room_id)
        .bind(&message.user_id)
        .bind(&message.username)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"DELETE FROM chat_messages WHERE room_id = $1 AND id NOT IN (
                 SELECT id FROM chat_messages WHERE room_id = $1
                 ORDER BY created_at DESC, id DESC LIMIT $2)"#,
        )
        .bind(&message.room_id)
        .bind(ROOM_HISTORY_LIMIT)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Newest `limit` messages in chronological order.
    pub async fn room_history(&self, room_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"SELECT * FROM chat_messages WHERE room_id = $1
               ORDER BY created_at DESC, id DESC LIMIT $2"#,
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut messages: Vec<ChatMessage> =
            rows.iter().map(row_to_message).collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn count_room_messages(&self, room_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chat_messages WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
