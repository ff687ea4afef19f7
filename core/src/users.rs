/// User accounts
///
/// Handles:
/// - Auto-registration on first login (any new username/password pair)
/// - Password hashing and verification (Argon2, per-user salt)
/// - Session tokens for the WebSocket transport (JWT, HS256)
/// - Rename, experience and level

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::models::{new_id, now_secs, User};
use crate::store::Store;
use crate::types::{Resources, Wallet};

/// Reserved name, rejected at registration and rename in any case mix.
const RESERVED_USERNAME: &str = "guest";

const INITIAL_RESOURCES: Resources = Resources { cpu: 200, bandwidth: 300.0, ram: 24 };
const INITIAL_WALLET: Wallet = Wallet { crypto: 15.0, data: 1200.0 };

/// Token lifetime: a week, ample for a browser tab.
const TOKEN_TTL_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    username: String,
    exp: usize,
}

pub struct UserService {
    store: Store,
    jwt_secret: String,
}

impl UserService {
    pub fn new(store: Store, jwt_secret: String) -> Self {
        Self { store, jwt_secret }
    }

    /// Verify an existing user's password, or auto-register a new one.
    /// This is the single entry point both transports authenticate through.
    pub async fn login_or_register(&self, username: &str, password: &str) -> Result<User> {
        if let Some(user) = self.store.get_user_by_name(username).await? {
            return if verify_password(password, &user.password_hash) {
                Ok(user)
            } else {
                Err(GameError::NotAuthenticated)
            };
        }
        self.register(username, password).await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(GameError::invalid("password must not be empty"));
        }
        if self.store.username_taken(username).await? {
            return Err(GameError::conflict(format!("username {} is taken", username)));
        }

        let (public_ip, local_ip, mac) = {
            let mut rng = rand::thread_rng();
            (generate_public_ip(&mut rng), generate_local_ip(&mut rng), generate_mac(&mut rng))
        };
        let user = User {
            id: new_id(),
            username: username.to_string(),
            password_hash: hash_password(password)?,
            public_ip,
            local_ip,
            mac,
            level: 0,
            experience: 0,
            resources: INITIAL_RESOURCES,
            wallet: INITIAL_WALLET,
            filesystem: serde_json::json!({}),
            created_at: now_secs(),
        };
        self.store.insert_user(&user).await?;
        tracing::info!("👤 Registered user {} ({})", user.username, user.public_ip);
        Ok(user)
    }

    pub async fn get(&self, user_id: &str) -> Result<User> {
        self.store.get_user(user_id).await
    }

    pub async fn get_by_name(&self, username: &str) -> Result<Option<User>> {
        self.store.get_user_by_name(username).await
    }

    /// Rename, enforcing uniqueness and the reserved-name rule.
    pub async fn rename(&self, user_id: &str, new_username: &str) -> Result<()> {
        validate_username(new_username)?;
        if self.store.username_taken(new_username).await? {
            return Err(GameError::conflict(format!("username {} is taken", new_username)));
        }
        self.store.rename_user(user_id, new_username).await
    }

    pub async fn add_experience(&self, user_id: &str, amount: i64) -> Result<i64> {
        self.store.add_experience(user_id, amount).await
    }

    /// Issue a signed token for WebSocket reconnects.
    pub fn issue_token(&self, user: &User) -> Result<String> {
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            exp: (now_secs() + TOKEN_TTL_SECS) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(GameError::internal)
    }

    /// Resolve a token back to its user.
    pub async fn verify_token(&self, token: &str) -> Result<User> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| GameError::NotAuthenticated)?;
        self.store.get_user(&data.claims.sub).await
    }
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 32 {
        return Err(GameError::invalid("username must be 1-32 characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(GameError::invalid("username may contain letters, digits, _ and -"));
    }
    if username.eq_ignore_ascii_case(RESERVED_USERNAME) {
        return Err(GameError::invalid("username guest is reserved"));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(GameError::internal)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// a.b.c.d with a and d in [1, 255].
fn generate_public_ip(rng: &mut impl Rng) -> String {
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(1..=255),
        rng.gen_range(0..=255),
        rng.gen_range(0..=255),
        rng.gen_range(1..=255u8)
    )
}

fn generate_local_ip(rng: &mut impl Rng) -> String {
    format!(
        "10.{}.{}.{}",
        rng.gen_range(0..=255),
        rng.gen_range(0..=255),
        rng.gen_range(1..=255u8)
    )
}

/// Locally administered unicast MAC: second-least-significant bit of the
/// first octet set, least-significant clear.
fn generate_mac(rng: &mut impl Rng) -> String {
    let first = (rng.gen::<u8>() | 0x02) & 0xfe;
    let rest: [u8; 5] = rng.gen();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        first, rest[0], rest[1], rest[2], rest[3], rest[4]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> UserService {
        let store = Store::open("sqlite::memory:").await.unwrap();
        UserService::new(store, "test-secret".to_string())
    }

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        // two hashes of the same password differ (per-user salt)
        assert_ne!(hash, hash_password("hunter2").unwrap());
    }

    #[test]
    fn test_guest_rejected_any_case() {
        for name in ["guest", "GUEST", "Guest"] {
            assert!(matches!(validate_username(name), Err(GameError::InvalidArgument(_))));
        }
        validate_username("alice").unwrap();
    }

    #[test]
    fn test_generated_identity_shapes() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let ip = generate_public_ip(&mut rng);
            let octets: Vec<u32> = ip.split('.').map(|o| o.parse().unwrap()).collect();
            assert_eq!(octets.len(), 4);
            assert!(octets[0] >= 1 && octets[3] >= 1);

            assert!(generate_local_ip(&mut rng).starts_with("10."));

            let mac = generate_mac(&mut rng);
            let first = u8::from_str_radix(&mac[0..2], 16).unwrap();
            assert_eq!(first & 0x03, 0x02);
        }
    }

    #[tokio::test]
    async fn test_auto_register_then_login() {
        let svc = service().await;
        let user = svc.login_or_register("alice", "pw").await.unwrap();
        assert_eq!(user.level, 0);
        assert_eq!(user.resources.cpu, 200);
        assert_eq!(user.wallet.crypto, 15.0);

        let again = svc.login_or_register("alice", "pw").await.unwrap();
        assert_eq!(again.id, user.id);

        assert!(matches!(
            svc.login_or_register("alice", "wrong").await,
            Err(GameError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_rename_uniqueness() {
        let svc = service().await;
        let alice = svc.login_or_register("alice", "pw").await.unwrap();
        svc.login_or_register("bob", "pw").await.unwrap();
        assert!(matches!(svc.rename(&alice.id, "bob").await, Err(GameError::Conflict(_))));
        assert!(matches!(svc.rename(&alice.id, "guest").await, Err(GameError::InvalidArgument(_))));
        svc.rename(&alice.id, "carol").await.unwrap();
        assert!(svc.get_by_name("carol").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_experience_drives_level() {
        let svc = service().await;
        let user = svc.login_or_register("alice", "pw").await.unwrap();
        svc.add_experience(&user.id, 95).await.unwrap();
        assert_eq!(svc.get(&user.id).await.unwrap().level, 0);
        svc.add_experience(&user.id, 10).await.unwrap();
        let user = svc.get(&user.id).await.unwrap();
        assert_eq!(user.experience, 105);
        assert_eq!(user.level, 1);
    }

    #[tokio::test]
    async fn test_token_round_trip() {
        let svc = service().await;
        let user = svc.login_or_register("alice", "pw").await.unwrap();
        let token = svc.issue_token(&user).unwrap();
        let resolved = svc.verify_token(&token).await.unwrap();
        assert_eq!(resolved.id, user.id);
        assert!(matches!(svc.verify_token("garbage").await, Err(GameError::NotAuthenticated)));
    }
}
