use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{ServerConfig, DEFAULT_PORT};
use crate::core::connection::OUTBOUND_QUEUE_DEPTH;
use crate::scripting::ScriptConfig;

#[derive(Debug, Parser)]
#[command(name = "sandlot")]
#[command(about = "A shared scene where every visitor scripts their own character")]
#[command(version)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Path clients upgrade on
    #[arg(long, default_value = "/ws")]
    pub ws_path: String,

    /// Name of the session cookie
    #[arg(long, default_value = "SESSION")]
    pub cookie: String,

    /// Refuse connections without a session cookie instead of issuing one
    #[arg(long)]
    pub no_issue_sessions: bool,

    /// Directory holding the browser client
    #[arg(long)]
    pub static_root: Option<PathBuf>,

    /// Outbound frames buffered per connection before it is dropped
    #[arg(long, default_value_t = OUTBOUND_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Seconds between keep-alive pings
    #[arg(long, default_value_t = 60)]
    pub ping_secs: u64,

    /// Wall-clock limit for one script, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub eval_timeout_ms: u64,

    /// Operation quota for one script (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_operations: u64,

    /// Send recent chat to newly joined connections
    #[arg(long)]
    pub replay_history: bool,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            ws_path: self.ws_path,
            cookie_name: self.cookie,
            issue_sessions: !self.no_issue_sessions,
            static_root: self.static_root,
            queue_depth: self.queue_depth.max(1),
            ping_interval: Duration::from_secs(self.ping_secs.max(1)),
            replay_history: self.replay_history,
            scripts: ScriptConfig {
                timeout: Duration::from_millis(self.eval_timeout_ms),
                max_operations: self.max_operations,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_config() {
        let config = Cli::parse_from(["sandlot", "--port", "9000"]).into_config();
        let defaults = ServerConfig::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.ws_path, defaults.ws_path);
        assert_eq!(config.cookie_name, defaults.cookie_name);
        assert_eq!(config.issue_sessions, defaults.issue_sessions);
        assert_eq!(config.scripts.timeout, defaults.scripts.timeout);
        assert_eq!(config.ping_interval, defaults.ping_interval);
    }

    #[test]
    fn flags_override() {
        let config = Cli::parse_from([
            "sandlot",
            "--no-issue-sessions",
            "--cookie",
            "SID",
            "--max-operations",
            "5000",
            "--replay-history",
        ])
        .into_config();
        assert!(!config.issue_sessions);
        assert_eq!(config.cookie_name, "SID");
        assert_eq!(config.scripts.max_operations, 5000);
        assert!(config.replay_history);
    }
}
