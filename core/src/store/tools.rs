use sqlx::any::AnyRow;
use sqlx::Row;

use super::{from_json, to_json, Store};
use crate::error::{GameError, Result};
use crate::models::{now_secs, Patch, Tool, ToolKind, UserToolState};

fn row_to_tool(row: &AnyRow) -> Result<Tool> {
    let kind_tag: String = row.try_get("kind")?;
    Ok(Tool {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: ToolKind::from_tag(&kind_tag)
            .ok_or_else(|| GameError::internal(format!("unknown tool kind {}", kind_tag)))?,
        cost: from_json(&row.try_get::<String, _>("cost")?)?,
        exploits: from_json(&row.try_get::<String, _>("exploits")?)?,
        service: row.try_get("service")?,
        is_patch: row.try_get::<i64, _>("is_patch")? != 0,
    })
}

fn row_to_patch(row: &AnyRow) -> Result<Patch> {
    Ok(Patch {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        target_tool: row.try_get("target_tool")?,
        description: row.try_get("description")?,
        exploits: from_json(&row.try_get::<String, _>("exploits")?)?,
        resources: from_json(&row.try_get::<String, _>("resources")?)?,
    })
}

fn row_to_state(row: &AnyRow) -> Result<UserToolState> {
    Ok(UserToolState {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tool_id: row.try_get("tool_id")?,
        tool_name: row.try_get("tool_name")?,
        version: row.try_get("version")?,
        applied_patches: from_json(&row.try_get::<String, _>("applied_patches")?)?,
        effective_exploits: from_json(&row.try_get::<String, _>("effective_exploits")?)?,
        effective_resources: from_json(&row.try_get::<String, _>("effective_resources")?)?,
    })
}

impl Store {
    pub async fn insert_tool(&self, tool: &Tool) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO tools (id, name, description, kind, cost, exploits, service, is_patch)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&tool.id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.kind.tag())
        .bind(to_json(&tool.cost)?)
        .bind(to_json(&tool.exploits)?)
        .bind(&tool.service)
        .bind(tool.is_patch as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_tool_by_name(&self, name: &str) -> Result<Option<Tool>> {
        let row = sqlx::query("SELECT * FROM tools WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_tool).transpose()
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let rows = sqlx::query("SELECT * FROM tools ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_tool).collect()
    }

    pub async fn count_tools(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tools")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn insert_patch(&self, patch: &Patch) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO patches (id, name, target_tool, description, exploits, resources)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&patch.id)
        .bind(&patch.name)
        .bind(&patch.target_tool)
        .bind(&patch.description)
        .bind(to_json(&patch.exploits)?)
        .bind(to_json(&patch.resources)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_patch_by_name(&self, name: &str) -> Result<Option<Patch>> {
        let row = sqlx::query("SELECT * FROM patches WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_patch).transpose()
    }

    pub async fn count_patches(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM patches")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Register tool ownership: the association row and the fresh
    /// `UserToolState` are written in one transaction.
    pub async fn add_user_tool(&self, state: &UserToolState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO user_tools (user_id, tool_id, acquired_at) VALUES ($1, $2, $3)")
            .bind(&state.user_id)
            .bind(&state.tool_id)
            .bind(now_secs())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO user_tool_states
                (id, user_id, tool_id, tool_name, version, applied_patches,
                 effective_exploits, effective_resources)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&state.id)
        .bind(&state.user_id)
        .bind(&state.tool_id)
        .bind(&state.tool_name)
        .bind(state.version)
        .bind(to_json(&state.applied_patches)?)
        .bind(to_json(&state.effective_exploits)?)
        .bind(to_json(&state.effective_resources)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_tool_state(&self, user_id: &str, tool_name: &str) -> Result<Option<UserToolState>> {
        let row = sqlx::query("SELECT * FROM user_tool_states WHERE user_id = $1 AND tool_name = $2")
            .bind(user_id)
            .bind(tool_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_state).transpose()
    }

    pub async fn list_tool_states(&self, user_id: &str) -> Result<Vec<UserToolState>> {
        let rows = sqlx::query("SELECT * FROM user_tool_states WHERE user_id = $1 ORDER BY tool_name")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_state).collect()
    }

    /// Persist a recomputed tool state after a patch apply. Strictly
    /// transactional per the error-handling policy.
    pub async fn update_tool_state(&self, state: &UserToolState) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE user_tool_states SET
                version = $1, applied_patches = $2,
                effective_exploits = $3, effective_resources = $4
               WHERE id = $5"#,
        )
        .bind(state.version)
        .bind(to_json(&state.applied_patches)?)
        .bind(to_json(&state.effective_exploits)?)
        .bind(to_json(&state.effective_resources)?)
        .bind(&state.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(GameError::not_found("tool state"));
        }
        Ok(())
    }

    pub async fn add_user_patch(&self, user_id: &str, patch_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_patches (user_id, patch_name, acquired_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(patch_name)
        .bind(now_secs())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                GameError::conflict(format!("patch {} already in inventory", patch_name))
            }
            other => GameError::from(other),
        })?;
        Ok(())
    }

    pub async fn user_owns_patch(&self, user_id: &str, patch_name: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM user_patches WHERE user_id = $1 AND patch_name = $2",
        )
        .bind(user_id)
        .bind(patch_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn list_user_patches(&self, user_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT patch_name FROM user_patches WHERE user_id = $1 ORDER BY patch_name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("patch_name").map_err(GameError::from))
            .collect()
    }
}
