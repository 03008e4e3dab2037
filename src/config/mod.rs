mod settings;

pub use settings::{DatabaseConfig, OtelConfig, QueueSettings, ServerConfig, Settings};
pub(crate) use settings::{default_consumer_name, default_queue_name};
