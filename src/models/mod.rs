pub mod bot;
pub mod message;

pub use bot::{Bot, BotIdentity, BotResponse};
pub use message::{IncomingMessage, Message, MessageFilter, MessageView};
