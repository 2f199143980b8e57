//! quizcast: posts operator-written quiz text to Telegram chats as quiz polls.

pub mod bot;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod parser;
pub mod sequence;
pub mod store;
