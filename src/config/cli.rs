//! Command-line flags

use clap::Parser;

/// WebRTC gateway bridging one audio client into a remote media room
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "roomgate", version, about)]
pub struct Cli {
    /// Optional config file (toml, yaml or json)
    #[arg(long)]
    pub config: Option<String>,

    /// Media server URL
    #[arg(long)]
    pub host: Option<String>,

    /// API key used to sign the room token
    #[arg(long = "api-key")]
    pub api_key: Option<String>,

    /// API secret used to sign the room token
    #[arg(long = "api-secret")]
    pub api_secret: Option<String>,

    /// Room to join
    #[arg(long = "room-name")]
    pub room_name: Option<String>,

    /// Participant identity inside the room
    #[arg(long)]
    pub identity: Option<String>,

    /// HTTP listen address, `host:port`
    #[arg(long)]
    pub listen: Option<String>,
}
