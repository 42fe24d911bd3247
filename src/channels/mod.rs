//! Channel clients for message I/O.

pub mod chat;
pub mod mail;
pub mod message;

pub use chat::{ChatBatch, ChatClient, ChatEndpoint};
pub use mail::{MailClient, Mailbox};
pub use message::{ChatUpdate, InboundMessage, Source};
