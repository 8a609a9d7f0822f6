pub mod broadcast;
pub mod connection;
pub mod history;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod scene;
pub mod session;
pub mod user;

// Transport
pub mod websocket;
