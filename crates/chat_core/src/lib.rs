//! chat_core - Core types shared by the chat engine crates
//!
//! - `config` - ClientConfig loading and credential selection
//! - `message` - Message and Role as sent to the provider
//! - `ids` - turn identifier generation
//! - `paths` - on-disk locations (config file, token cache)
//! - `logging` - env_logger setup

pub mod config;
pub mod ids;
pub mod logging;
pub mod message;
pub mod paths;

pub use config::{ClientConfig, ConfigError, Credential};
pub use ids::new_turn_id;
pub use logging::{init_logging, LogLevel};
pub use message::{Message, Role};
