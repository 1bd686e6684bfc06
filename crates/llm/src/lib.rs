pub mod client;
pub mod provider;

pub use client::HttpChatClient;
pub use provider::{ChatError, ChatMessage, ChatProvider, ChatRole, ResilientChat};
