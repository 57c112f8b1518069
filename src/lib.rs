pub mod agent;
pub mod cli;
pub mod commands;
pub mod compression;
pub mod config;
pub mod diff;
pub mod edit_block;
pub mod error;
pub mod gateway;
pub mod images;
pub mod logging;
pub mod message;
pub mod patch;
pub mod permissions;
pub mod prompt_builder;
pub mod tool_registry;
pub mod tools;
pub mod ui;

pub use agent::Session;
pub use config::Config;
pub use tool_registry::ToolRegistry;
