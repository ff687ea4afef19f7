pub mod chat;
pub mod fs;
pub mod misc;
pub mod net;
pub mod shop;
pub mod tools;

pub use chat::chat_command;
