//! Replybot — polls a mailbox and a chat-bot endpoint, answers each new
//! message with generated text, and exposes a liveness probe.

pub mod channels;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod poll;
pub mod server;
