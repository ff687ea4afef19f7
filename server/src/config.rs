use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// SSH listener bind address.
    pub host: String,
    pub port: u16,
    /// Web (WebSocket + static assets) bind address.
    pub web_host: String,
    pub web_port: u16,
    /// Host key on disk; an ephemeral key is generated when unset/missing.
    pub hostkey_path: Option<String>,
    /// Full database URL; takes precedence over `database_path`.
    pub database_url: Option<String>,
    /// Embedded database file (`:memory:` permitted).
    pub database_path: String,
    pub jwt_secret: String,
    /// Seed catalog override; embedded seed otherwise.
    pub seed_path: Option<String>,
}

const DEV_JWT_SECRET: &str = "terminal-sh-dev-secret";

impl Config {
    pub fn load() -> Self {
        let mut cfg = Self {
            host: "0.0.0.0".to_string(),
            port: 2222,
            web_host: "0.0.0.0".to_string(),
            web_port: 8080,
            hostkey_path: None,
            database_url: None,
            database_path: "data/terminal.db".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            seed_path: None,
        };
        if let Ok(h) = std::env::var("HOST") {
            cfg.host = h;
        }
        if let Ok(p) = std::env::var("PORT") {
            cfg.port = p.parse().unwrap_or(2222);
        }
        if let Ok(h) = std::env::var("WEB_HOST") {
            cfg.web_host = h;
        }
        if let Ok(p) = std::env::var("WEB_PORT") {
            cfg.web_port = p.parse().unwrap_or(8080);
        }
        if let Ok(k) = std::env::var("HOSTKEY_PATH") {
            if !k.is_empty() {
                cfg.hostkey_path = Some(k);
            }
        }
        if let Ok(u) = std::env::var("DATABASE_URL") {
            if !u.is_empty() {
                cfg.database_url = Some(u);
            }
        }
        if let Ok(p) = std::env::var("DATABASE_PATH") {
            if !p.is_empty() {
                cfg.database_path = p;
            }
        }
        if let Ok(s) = std::env::var("JWT_SECRET") {
            if !s.is_empty() {
                cfg.jwt_secret = s;
            }
        }
        if let Ok(s) = std::env::var("SEED_PATH") {
            if !s.is_empty() {
                cfg.seed_path = Some(s);
            }
        }

        if cfg.jwt_secret == DEV_JWT_SECRET {
            tracing::warn!("⚠️  JWT_SECRET not set — using the development secret");
        }
        cfg
    }

    /// DATABASE_URL wins; DATABASE_PATH maps to an embedded sqlite URL.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => termsh_core::store::sqlite_url(&self.database_path),
        }
    }

    pub fn ssh_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn web_addr(&self) -> String {
        format!("{}:{}", self.web_host, self.web_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_precedence() {
        let mut cfg = Config {
            host: "0.0.0.0".into(),
            port: 2222,
            web_host: "0.0.0.0".into(),
            web_port: 8080,
            hostkey_path: None,
            database_url: None,
            database_path: ":memory:".into(),
            jwt_secret: "s".into(),
            seed_path: None,
        };
        assert_eq!(cfg.database_url(), "sqlite::memory:");
        cfg.database_url = Some("postgres://game@db/terminal".into());
        assert_eq!(cfg.database_url(), "postgres://game@db/terminal");
    }
}
