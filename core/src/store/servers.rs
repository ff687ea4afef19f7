use sqlx::any::AnyRow;
use sqlx::Row;

use super::{from_json, to_json, Store};
use crate::error::{GameError, Result};
use crate::models::Server;

fn row_to_server(row: &AnyRow) -> Result<Server> {
    Ok(Server {
        ip: row.try_get("ip")?,
        local_ip: row.try_get("local_ip")?,
        security_level: row.try_get("security_level")?,
        resources: from_json(&row.try_get::<String, _>("resources")?)?,
        used_resources: from_json(&row.try_get::<String, _>("used_resources")?)?,
        wallet: from_json(&row.try_get::<String, _>("wallet")?)?,
        listed_tools: from_json(&row.try_get::<String, _>("listed_tools")?)?,
        connected_ips: from_json(&row.try_get::<String, _>("connected_ips")?)?,
        services: from_json(&row.try_get::<String, _>("services")?)?,
        roles: from_json(&row.try_get::<String, _>("roles")?)?,
        filesystem: from_json(&row.try_get::<String, _>("filesystem")?)?,
        local_network: from_json(&row.try_get::<String, _>("local_network")?)?,
        parent_ip: row.try_get("parent_ip")?,
        created_at: row.try_get("created_at")?,
    })
}

impl Store {
    pub async fn insert_server(&self, server: &Server) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO servers
                (ip, local_ip, security_level, resources, used_resources, wallet,
                 listed_tools, connected_ips, services, roles, filesystem,
                 local_network, parent_ip, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(&server.ip)
        .bind(&server.local_ip)
        .bind(server.security_level)
        .bind(to_json(&server.resources)?)
        .bind(to_json(&server.used_resources)?)
        .bind(to_json(&server.wallet)?)
        .bind(to_json(&server.listed_tools)?)
        .bind(to_json(&server.connected_ips)?)
        .bind(to_json(&server.services)?)
        .bind(to_json(&server.roles)?)
        .bind(to_json(&server.filesystem)?)
        .bind(to_json(&server.local_network)?)
        .bind(&server.parent_ip)
        .bind(server.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full-row update; the server graph is the only writer and holds the
    /// per-server lock across read-modify-write cycles.
    pub async fn save_server(&self, server: &Server) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE servers SET
                local_ip = $1, security_level = $2, resources = $3,
                used_resources = $4, wallet = $5, listed_tools = $6,
                connected_ips = $7, services = $8, roles = $9, filesystem = $10,
                local_network = $11, parent_ip = $12
               WHERE ip = $13"#,
        )
        .bind(&server.local_ip)
        .bind(server.security_level)
        .bind(to_json(&server.resources)?)
        .bind(to_json(&server.used_resources)?)
        .bind(to_json(&server.wallet)?)
        .bind(to_json(&server.listed_tools)?)
        .bind(to_json(&server.connected_ips)?)
        .bind(to_json(&server.services)?)
        .bind(to_json(&server.roles)?)
        .bind(to_json(&server.filesystem)?)
        .bind(to_json(&server.local_network)?)
        .bind(&server.parent_ip)
        .bind(&server.ip)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GameError::not_found("server"));
        }
        Ok(())
    }

    pub async fn get_server(&self, ip: &str) -> Result<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE ip = $1")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_server).transpose()
    }

    /// Lookup accepting either the public `ip` key or the `local_ip` field.
    pub async fn get_server_loose(&self, ip: &str) -> Result<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE ip = $1 OR local_ip = $1")
            .bind(ip)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_server).transpose()
    }

    pub async fn list_top_level_servers(&self) -> Result<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers WHERE parent_ip IS NULL ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_server).collect()
    }

    pub async fn list_all_servers(&self) -> Result<Vec<Server>> {
        let rows = sqlx::query("SELECT * FROM servers ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_server).collect()
    }

    pub async fn save_server_filesystem(&self, ip: &str, overlay: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE servers SET filesystem = $1 WHERE ip = $2")
            .bind(to_json(overlay)?)
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_servers(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM servers")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
