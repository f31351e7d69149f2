pub mod connector;
#[cfg(test)]
pub mod mock;
pub mod registry;

pub use connector::{BotConnector, ConnectorError, TelegramConnector};
pub use registry::WorkerRegistry;
