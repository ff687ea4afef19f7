/// Typed persistence over a single SQL pool
///
/// One `Store` serves both backends the deployment supports: PostgreSQL via
/// `DATABASE_URL` and an embedded sqlite file (`DATABASE_PATH`, `:memory:`
/// permitted for tests). All structured columns are JSON TEXT; ids are UUID
/// strings; time columns are UTC epoch values.

mod chat;
mod exploits;
mod miners;
mod servers;
mod sessions;
mod shops;
mod tools;
mod users;

pub use chat::ROOM_HISTORY_LIMIT;
pub use shops::Fulfillment;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::AnyPool;

use crate::error::{GameError, Result};

#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
}

/// CREATE TABLE statements, executed one by one so the same batch works on
/// both sqlite and postgres.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        public_ip TEXT NOT NULL,
        local_ip TEXT NOT NULL,
        mac TEXT NOT NULL,
        level BIGINT NOT NULL DEFAULT 0,
        experience BIGINT NOT NULL DEFAULT 0,
        resources TEXT NOT NULL,
        wallet TEXT NOT NULL,
        filesystem TEXT NOT NULL DEFAULT '{}',
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS servers (
        ip TEXT PRIMARY KEY,
        local_ip TEXT NOT NULL,
        security_level BIGINT NOT NULL,
        resources TEXT NOT NULL,
        used_resources TEXT NOT NULL,
        wallet TEXT NOT NULL,
        listed_tools TEXT NOT NULL DEFAULT '[]',
        connected_ips TEXT NOT NULL DEFAULT '[]',
        services TEXT NOT NULL DEFAULT '[]',
        roles TEXT NOT NULL DEFAULT '[]',
        filesystem TEXT NOT NULL DEFAULT '{}',
        local_network TEXT NOT NULL DEFAULT '[]',
        parent_ip TEXT,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tools (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        kind TEXT NOT NULL,
        cost TEXT NOT NULL,
        exploits TEXT NOT NULL DEFAULT '[]',
        service TEXT,
        is_patch INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS patches (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        target_tool TEXT NOT NULL,
        description TEXT NOT NULL,
        exploits TEXT NOT NULL DEFAULT '[]',
        resources TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_tools (
        user_id TEXT NOT NULL,
        tool_id TEXT NOT NULL,
        acquired_at BIGINT NOT NULL,
        PRIMARY KEY (user_id, tool_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_tool_states (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        tool_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        version BIGINT NOT NULL DEFAULT 1,
        applied_patches TEXT NOT NULL DEFAULT '[]',
        effective_exploits TEXT NOT NULL DEFAULT '[]',
        effective_resources TEXT NOT NULL,
        UNIQUE (user_id, tool_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_patches (
        user_id TEXT NOT NULL,
        patch_name TEXT NOT NULL,
        acquired_at BIGINT NOT NULL,
        PRIMARY KEY (user_id, patch_name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS exploitations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        server_path TEXT NOT NULL,
        service_name TEXT NOT NULL,
        exploits TEXT NOT NULL DEFAULT '[]',
        created_at BIGINT NOT NULL,
        UNIQUE (user_id, server_path, service_name)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS active_miners (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        server_ip TEXT NOT NULL,
        reservation TEXT NOT NULL,
        started_at BIGINT NOT NULL,
        UNIQUE (user_id, server_ip)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS shops (
        id TEXT PRIMARY KEY,
        server_ip TEXT NOT NULL UNIQUE,
        shop_type TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS shop_items (
        id TEXT NOT NULL,
        shop_id TEXT NOT NULL,
        item_type TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        price_crypto DOUBLE PRECISION NOT NULL,
        price_data DOUBLE PRECISION NOT NULL,
        stock BIGINT NOT NULL DEFAULT -1,
        PRIMARY KEY (shop_id, id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_purchases (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        shop_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        price_crypto DOUBLE PRECISION NOT NULL,
        price_data DOUBLE PRECISION NOT NULL,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chat_rooms (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        room_type TEXT NOT NULL,
        password_hash TEXT NOT NULL DEFAULT '',
        created_by TEXT NOT NULL,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chat_room_members (
        room_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        joined_at BIGINT NOT NULL,
        PRIMARY KEY (room_id, user_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY,
        room_id TEXT NOT NULL,
        user_id TEXT,
        username TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at BIGINT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_chat_messages_room
        ON chat_messages (room_id, created_at)"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        username TEXT NOT NULL,
        transport TEXT NOT NULL,
        connected_at BIGINT NOT NULL
    )"#,
];

impl Store {
    /// Open a pool against `url` and ensure the schema exists.
    ///
    /// `sqlite::memory:` gets a single connection so every query sees the
    /// same in-memory database.
    pub async fn open(url: &str) -> Result<Self> {
        install_default_drivers();

        let max_connections = if url.contains(":memory:") { 1 } else { 8 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// URL for an embedded database at `path`; `:memory:` maps to the sqlite
/// in-memory database.
pub fn sqlite_url(path: &str) -> String {
    if path == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite://{}?mode=rwc", path)
    }
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(GameError::from)
}

pub(crate) fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(GameError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_url_shapes() {
        assert_eq!(sqlite_url(":memory:"), "sqlite::memory:");
        assert_eq!(sqlite_url("data/terminal.db"), "sqlite://data/terminal.db?mode=rwc");
    }

    #[tokio::test]
    async fn test_open_creates_schema() {
        let store = Store::open("sqlite::memory:").await.unwrap();
        // Re-running schema creation is a no-op.
        store.init_schema().await.unwrap();
        store.close().await;
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terminal.db");
        let store = Store::open(&sqlite_url(path.to_str().unwrap())).await.unwrap();
        store.close().await;
        assert!(path.exists());
    }
}
