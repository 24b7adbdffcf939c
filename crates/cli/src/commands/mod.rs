pub mod config;
pub mod store;
pub mod utils;

pub use config::{handle_config_command, ConfigCommands};
pub use store::{handle_store_command, StoreCommands};
