//! Shared CLI settings for reaching the relay.

use clap::Args;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, Args)]
pub struct RelaySettings {
    /// HTTP(S) base URL of the relay server.
    #[arg(long, env = "CHORUS_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// STUN servers used for connectivity discovery. Repeatable.
    #[arg(long = "stun", env = "CHORUS_STUN", default_value = DEFAULT_STUN)]
    pub stun_servers: Vec<String>,
}
