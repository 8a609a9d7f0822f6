use std::path::PathBuf;
use std::time::Duration;

use crate::core::connection::OUTBOUND_QUEUE_DEPTH;
use crate::scripting::ScriptConfig;

pub const DEFAULT_PORT: u16 = 8899;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Only upgrades on this path are accepted.
    pub ws_path: String,
    pub cookie_name: String,
    /// Mint a session for upgrades that arrive without one.
    pub issue_sessions: bool,
    /// Directory of the browser client. Served by whatever fronts this process.
    pub static_root: Option<PathBuf>,
    pub queue_depth: usize,
    pub ping_interval: Duration,
    /// Replay recent chat to every newly joined connection.
    pub replay_history: bool,
    pub scripts: ScriptConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            ws_path: "/ws".into(),
            cookie_name: "SESSION".into(),
            issue_sessions: true,
            static_root: None,
            queue_depth: OUTBOUND_QUEUE_DEPTH,
            ping_interval: Duration::from_secs(60),
            replay_history: false,
            scripts: ScriptConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
