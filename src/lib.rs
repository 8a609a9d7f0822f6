pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod objects;
pub mod scripting;

// Re-export for convenience
pub use crate::config::ServerConfig;
pub use crate::core::router::Router;
pub use crate::core::websocket::WebSocketServer;
