// terminal.sh game core — state engine shared by the SSH and WebSocket
// transports.
//
// Engines: UserService, ServerGraph, ToolRuntime, ExploitEngine,
// MiningEngine, ShopEngine, ChatEngine
// Plumbing: Store (sqlite/postgres), CatalogLoader, VFS

pub mod catalog;
pub mod chat;
pub mod error;
pub mod exploits;
pub mod mining;
pub mod models;
pub mod servers;
pub mod shops;
pub mod store;
pub mod tools;
pub mod types;
pub mod users;
pub mod vfs;

pub use error::{GameError, Result};
pub use store::Store;
