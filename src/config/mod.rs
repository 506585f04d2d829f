//! Configuration management
//!
//! Settings are layered: built-in defaults, an optional config file,
//! `ROOMGATE__*` environment variables and finally command-line flags.

mod cli;

pub use cli::Cli;

use crate::domain::shared::{GatewayError, Result};
use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub room: RoomConfig,
    #[serde(default)]
    pub webrtc: WebRtcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Remote room the gateway joins at startup
#[derive(Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Media server base URL
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub room_name: String,
    /// Participant identity of the embedded room client
    #[serde(default)]
    pub identity: String,
    /// Path of the offer/answer endpoint on the media server
    #[serde(default = "default_signal_path")]
    pub signal_path: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// ICE server URLs applied to every peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
    /// Upper bound on a full offer/answer exchange including ICE gathering
    #[serde(default = "default_negotiation_timeout")]
    pub negotiation_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_signal_path() -> String {
    "/whip".to_string()
}

fn default_token_ttl() -> u64 {
    6 * 60 * 60 // 6 hours
}

fn default_ice_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

fn default_negotiation_timeout() -> u64 {
    10
}

impl Config {
    /// Load settings from defaults, an optional file and the environment
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("room.signal_path", default_signal_path())?
            .set_default("webrtc.ice_servers", default_ice_servers())?
            .set_default(
                "webrtc.negotiation_timeout_secs",
                default_negotiation_timeout() as i64,
            )?;

        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("ROOMGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("webrtc.ice_servers"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Overlay explicitly passed command-line flags
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<()> {
        let overrides = [
            (&cli.host, &mut self.room.host),
            (&cli.api_key, &mut self.room.api_key),
            (&cli.api_secret, &mut self.room.api_secret),
            (&cli.room_name, &mut self.room.room_name),
            (&cli.identity, &mut self.room.identity),
        ];
        for (flag, target) in overrides {
            if let Some(value) = flag {
                *target = value.clone();
            }
        }

        if let Some(ref listen) = cli.listen {
            match listen.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port.parse().map_err(|_| {
                        GatewayError::Config(format!("invalid --listen port in {:?}", listen))
                    })?;
                    self.server.host = host.to_string();
                    self.server.port = port;
                }
                None => self.server.host = listen.clone(),
            }
        }

        Ok(())
    }

    /// Check the required room flags, reporting the first missing one
    ///
    /// Order is fixed: host, api-key, api-secret, room-name, identity.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("host", &self.room.host),
            ("api-key", &self.room.api_key),
            ("api-secret", &self.room.api_secret),
            ("room-name", &self.room.room_name),
            ("identity", &self.room.identity),
        ];

        match required.iter().find(|(_, value)| value.is_empty()) {
            Some((flag, _)) => Err(GatewayError::MissingFlag(*flag)),
            None => Ok(()),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebRtcConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            room: RoomConfig::default(),
            webrtc: WebRtcConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            room_name: String::new(),
            identity: String::new(),
            signal_path: default_signal_path(),
            token_ttl_secs: default_token_ttl(),
        }
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            negotiation_timeout_secs: default_negotiation_timeout(),
        }
    }
}

// Keeps the api secret out of startup logs.
impl std::fmt::Debug for RoomConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomConfig")
            .field("host", &self.host)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("room_name", &self.room_name)
            .field("identity", &self.identity)
            .field("signal_path", &self.signal_path)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}
