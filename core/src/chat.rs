/// Chat engine
///
/// Persistent rooms with live fan-out. The in-memory index (rooms, members,
/// subscribers) sits behind one reader/writer lock; membership mutations
/// hold the write side across the store insert so index and store never
/// disagree. Broadcasts take the read side only and enqueue non-blockingly
/// into bounded per-session channels.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};

use crate::error::{GameError, Result};
use crate::models::{new_id, next_millis, now_secs, ChatMessage, ChatRoom, RoomType};
use crate::store::Store;
use crate::users::{hash_password, verify_password};

/// Per-session inbox capacity; a full inbox drops the incoming message for
/// that subscriber only.
pub const SUBSCRIBER_BUFFER: usize = 100;

struct Subscriber {
    user_id: String,
    tx: mpsc::Sender<ChatMessage>,
}

#[derive(Default)]
struct ChatIndex {
    rooms_by_id: HashMap<String, ChatRoom>,
    rooms_by_name: HashMap<String, String>,
    members: HashMap<String, HashSet<String>>,
    subscribers: HashMap<String, Subscriber>,
}

pub struct ChatEngine {
    store: Store,
    index: RwLock<ChatIndex>,
}

impl ChatEngine {
    pub fn new(store: Store) -> Self {
        Self { store, index: RwLock::new(ChatIndex::default()) }
    }

    /// Rebuild the index from the store at boot.
    pub async fn load(&self) -> Result<()> {
        let rooms = self.store.list_rooms().await?;
        let memberships = self.store.list_all_room_members().await?;
        let mut index = self.index.write().await;
        for room in rooms {
            index.rooms_by_name.insert(room.name.clone(), room.id.clone());
            index.rooms_by_id.insert(room.id.clone(), room);
        }
        for (room_id, user_id) in memberships {
            index.members.entry(room_id).or_default().insert(user_id);
        }
        tracing::info!("💬 Chat index loaded: {} rooms", index.rooms_by_id.len());
        Ok(())
    }

    /// Register a session for live delivery; the receiver is selected on by
    /// the session task.
    pub async fn register_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> mpsc::Receiver<ChatMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut index = self.index.write().await;
        index.subscribers.insert(
            session_id.to_string(),
            Subscriber { user_id: user_id.to_string(), tx },
        );
        rx
    }

    /// Drop a session's subscriber channel; membership is untouched.
    pub async fn unregister_session(&self, session_id: &str) {
        let mut index = self.index.write().await;
        index.subscribers.remove(session_id);
    }

    pub async fn create_room(
        &self,
        name: &str,
        room_type: RoomType,
        password: Option<&str>,
        creator_id: &str,
    ) -> Result<ChatRoom> {
        if name.is_empty() || name.len() > 32 || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(GameError::invalid("room name may contain letters, digits, _ and -"));
        }
        let password_hash = match room_type {
            RoomType::Password => {
                let password = password
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| GameError::invalid("password rooms need a password"))?;
                hash_password(password)?
            }
            _ => String::new(),
        };

        let room = ChatRoom {
            id: new_id(),
            name: name.to_string(),
            room_type,
            password_hash,
            created_by: creator_id.to_string(),
            created_at: now_secs(),
        };

        let mut index = self.index.write().await;
        if index.rooms_by_name.contains_key(name) {
            return Err(GameError::conflict(format!("room {} already exists", name)));
        }
        self.store.insert_room(&room).await?;
        index.rooms_by_name.insert(room.name.clone(), room.id.clone());
        index.rooms_by_id.insert(room.id.clone(), room.clone());
        index
            .members
            .entry(room.id.clone())
            .or_default()
            .insert(creator_id.to_string());
        tracing::info!("💬 Room {} created by {}", room.name, creator_id);
        Ok(room)
    }

    pub async fn find_room(&self, name: &str) -> Result<ChatRoom> {
        let index = self.index.read().await;
        index
            .rooms_by_name
            .get(name)
            .and_then(|id| index.rooms_by_id.get(id))
            .cloned()
            .ok_or_else(|| GameError::not_found(format!("room {}", name)))
    }

    pub async fn list_rooms(&self) -> Vec<ChatRoom> {
        let index = self.index.read().await;
        let mut rooms: Vec<ChatRoom> = index.rooms_by_id.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    pub async fn is_member(&self, room_id: &str, user_id: &str) -> bool {
        let index = self.index.read().await;
        index
            .members
            .get(room_id)
            .map(|m| m.contains(user_id))
            .unwrap_or(false)
    }

    pub async fn member_ids(&self, room_id: &str) -> Vec<String> {
        let index = self.index.read().await;
        index
            .members
            .get(room_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Join semantics by room type: public is unconditional, password
    /// verifies, private requires an invitation.
    pub async fn join_room(&self, name: &str, user_id: &str, password: Option<&str>) -> Result<ChatRoom> {
        let room = self.find_room(name).await?;
        if self.is_member(&room.id, user_id).await {
            return Ok(room);
        }
        match room.room_type {
            RoomType::Public => {}
            RoomType::Password => {
                let given = password.ok_or_else(|| GameError::denied("room requires a password"))?;
                if !verify_password(given, &room.password_hash) {
                    return Err(GameError::denied("wrong room password"));
                }
            }
            RoomType::Private => {
                return Err(GameError::denied(format!("room {} requires invitation", name)));
            }
        }

        let mut index = self.index.write().await;
        self.store.add_room_member(&room.id, user_id, now_secs()).await?;
        index.members.entry(room.id.clone()).or_default().insert(user_id.to_string());
        Ok(room)
    }

    /// A member may invite anyone; the invitee joins immediately and their
    /// live sessions get a system note.
    pub async fn invite_user(
        &self,
        room_name: &str,
        inviter_id: &str,
        inviter_name: &str,
        invitee_id: &str,
    ) -> Result<()> {
        let room = self.find_room(room_name).await?;
        if !self.is_member(&room.id, inviter_id).await {
            return Err(GameError::denied("only members may invite"));
        }

        {
            let mut index = self.index.write().await;
            self.store.add_room_member(&room.id, invitee_id, now_secs()).await?;
            index.members.entry(room.id.clone()).or_default().insert(invitee_id.to_string());
        }

        let note = ChatMessage {
            id: new_id(),
            room_id: room.id.clone(),
            user_id: None,
            username: "system".to_string(),
            content: format!(
                "{} invited you to {}. Use /join {}.",
                inviter_name, room.name, room.name
            ),
            created_at: next_millis(),
        };
        let index = self.index.read().await;
        for sub in index.subscribers.values() {
            if sub.user_id == invitee_id {
                let _ = sub.tx.try_send(note.clone());
            }
        }
        Ok(())
    }

    pub async fn leave_room(&self, room_name: &str, user_id: &str) -> Result<()> {
        let room = self.find_room(room_name).await?;
        if !self.is_member(&room.id, user_id).await {
            return Err(GameError::denied(format!("not a member of {}", room_name)));
        }
        let mut index = self.index.write().await;
        self.store.remove_room_member(&room.id, user_id).await?;
        if let Some(members) = index.members.get_mut(&room.id) {
            members.remove(user_id);
        }
        Ok(())
    }

    /// Append to the store (trimming the ring), then fan out to every
    /// subscriber whose user is a member. try_send: a slow consumer loses
    /// the message, nobody blocks.
    pub async fn send_message(
        &self,
        room_name: &str,
        user_id: &str,
        username: &str,
        content: &str,
    ) -> Result<ChatMessage> {
        let room = self.find_room(room_name).await?;
        if !self.is_member(&room.id, user_id).await {
            return Err(GameError::denied(format!("not a member of {}", room_name)));
        }
        let message = ChatMessage {
            id: new_id(),
            room_id: room.id.clone(),
            user_id: Some(user_id.to_string()),
            username: username.to_string(),
            content: content.to_string(),
            created_at: next_millis(),
        };
        self.store.append_chat_message(&message).await?;

        let index = self.index.read().await;
        if let Some(members) = index.members.get(&room.id) {
            for sub in index.subscribers.values() {
                if members.contains(&sub.user_id) {
                    if sub.tx.try_send(message.clone()).is_err() {
                        tracing::debug!("💬 Dropped message for a saturated subscriber");
                    }
                }
            }
        }
        Ok(message)
    }

    pub async fn history(&self, room_name: &str, user_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let room = self.find_room(room_name).await?;
        if !self.is_member(&room.id, user_id).await {
            return Err(GameError::denied(format!("not a member of {}", room_name)));
        }
        self.store.room_history(&room.id, limit).await
    }

    /// Room name for a message already delivered to a subscriber.
    pub async fn room_name_of(&self, room_id: &str) -> Option<String> {
        let index = self.index.read().await;
        index.rooms_by_id.get(room_id).map(|r| r.name.clone())
    }

    /// Room names a user belongs to.
    pub async fn rooms_of(&self, user_id: &str) -> Vec<String> {
        let index = self.index.read().await;
        let mut names: Vec<String> = index
            .members
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .filter_map(|(room_id, _)| index.rooms_by_id.get(room_id).map(|r| r.name.clone()))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ROOM_HISTORY_LIMIT;

    async fn engine() -> ChatEngine {
        let store = Store::open("sqlite::memory:").await.unwrap();
        ChatEngine::new(store)
    }

    #[tokio::test]
    async fn test_create_and_duplicate_room() {
        let chat = engine().await;
        chat.create_room("lobby", RoomType::Public, None, "u1").await.unwrap();
        assert!(matches!(
            chat.create_room("lobby", RoomType::Public, None, "u2").await,
            Err(GameError::Conflict(_))
        ));
        assert!(chat.is_member(&chat.find_room("lobby").await.unwrap().id, "u1").await);
    }

    #[tokio::test]
    async fn test_join_semantics_per_room_type() {
        let chat = engine().await;
        chat.create_room("open", RoomType::Public, None, "u1").await.unwrap();
        chat.create_room("sekrit", RoomType::Private, None, "u1").await.unwrap();
        chat.create_room("vault", RoomType::Password, Some("pw"), "u1").await.unwrap();

        chat.join_room("open", "u2", None).await.unwrap();

        assert!(matches!(
            chat.join_room("sekrit", "u2", None).await,
            Err(GameError::PermissionDenied(_))
        ));

        assert!(matches!(
            chat.join_room("vault", "u2", Some("wrong")).await,
            Err(GameError::PermissionDenied(_))
        ));
        chat.join_room("vault", "u2", Some("pw")).await.unwrap();
    }

    #[tokio::test]
    async fn test_invite_into_private_room() {
        let chat = engine().await;
        chat.create_room("team", RoomType::Private, None, "u1").await.unwrap();

        // non-member cannot invite
        assert!(matches!(
            chat.invite_user("team", "u3", "mallory", "u2").await,
            Err(GameError::PermissionDenied(_))
        ));

        let mut rx = chat.register_session("sess-bob", "u2").await;
        chat.invite_user("team", "u1", "alice", "u2").await.unwrap();
        let room = chat.find_room("team").await.unwrap();
        assert!(chat.is_member(&room.id, "u2").await);

        let note = rx.try_recv().unwrap();
        assert_eq!(note.username, "system");
        assert!(note.content.contains("alice invited you to team"));
    }

    #[tokio::test]
    async fn test_send_requires_membership_and_fans_out() {
        let chat = engine().await;
        chat.create_room("lobby", RoomType::Public, None, "u1").await.unwrap();
        chat.join_room("lobby", "u2", None).await.unwrap();

        let mut rx1 = chat.register_session("s1", "u1").await;
        let mut rx2 = chat.register_session("s2", "u2").await;
        let mut rx3 = chat.register_session("s3", "u3").await; // not a member

        assert!(matches!(
            chat.send_message("lobby", "u3", "outsider", "hi").await,
            Err(GameError::PermissionDenied(_))
        ));

        chat.send_message("lobby", "u1", "alice", "hello").await.unwrap();
        assert_eq!(rx1.try_recv().unwrap().content, "hello");
        assert_eq!(rx2.try_recv().unwrap().content, "hello");
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_history_ring_trims_to_limit() {
        let chat = engine().await;
        chat.create_room("lobby", RoomType::Public, None, "u1").await.unwrap();
        let room = chat.find_room("lobby").await.unwrap();
        for i in 0..(ROOM_HISTORY_LIMIT + 20) {
            chat.send_message("lobby", "u1", "alice", &format!("msg {}", i)).await.unwrap();
        }
        let count = chat.store.count_room_messages(&room.id).await.unwrap();
        assert_eq!(count, ROOM_HISTORY_LIMIT);
        let history = chat.history("lobby", "u1", ROOM_HISTORY_LIMIT).await.unwrap();
        assert_eq!(history.last().unwrap().content, format!("msg {}", ROOM_HISTORY_LIMIT + 19));
        assert_eq!(history.first().unwrap().content, "msg 20");
    }

    #[tokio::test]
    async fn test_leave_keeps_subscriber_channel() {
        let chat = engine().await;
        chat.create_room("lobby", RoomType::Public, None, "u1").await.unwrap();
        chat.join_room("lobby", "u2", None).await.unwrap();
        let mut rx2 = chat.register_session("s2", "u2").await;

        chat.leave_room("lobby", "u2").await.unwrap();
        // channel still open, but no delivery for a non-member
        chat.send_message("lobby", "u1", "alice", "gone?").await.unwrap();
        assert!(rx2.try_recv().is_err());

        // unregister closes it
        chat.unregister_session("s2").await;
        assert!(matches!(rx2.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn test_load_rebuilds_index() {
        let store = Store::open("sqlite::memory:").await.unwrap();
        {
            let chat = ChatEngine::new(store.clone());
            chat.create_room("persist", RoomType::Public, None, "u1").await.unwrap();
            chat.join_room("persist", "u2", None).await.unwrap();
        }
        let chat = ChatEngine::new(store);
        chat.load().await.unwrap();
        let room = chat.find_room("persist").await.unwrap();
        assert!(chat.is_member(&room.id, "u1").await);
        assert!(chat.is_member(&room.id, "u2").await);
    }
}
