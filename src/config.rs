// Node configuration

use std::net::SocketAddr;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::arbitrate::{CVar, GameInfo, UserInfo};
use crate::error::NetError;
use crate::logger::{LogFormat, LogLevel};
use crate::node::MAX_NODES;
use crate::session::SessionConfig;
use crate::Tic;

pub const CONFIG_NAME: &str = "lockstep";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub net: NetConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetConfig {
    /// Used when `players` does not list our own address.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub console_player: usize,
    /// Address of every player, ours included. Empty means a solo game.
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default = "default_extra_tics")]
    pub extra_tics: Tic,
    #[serde(default = "default_ticdup")]
    pub ticdup: Tic,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub team: u8,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_map")]
    pub map: String,
    /// Random when unset.
    #[serde(default)]
    pub rng_seed: Option<u32>,
    #[serde(default)]
    pub settings: Vec<CVar>,
    /// Quit after this many simulation tics.
    #[serde(default)]
    pub max_tics: Option<Tic>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            console_player: 0,
            players: Vec::new(),
            extra_tics: default_extra_tics(),
            ticdup: default_ticdup(),
            name: default_name(),
            team: 0,
            color: default_color(),
            map: default_map(),
            rng_seed: None,
            settings: Vec::new(),
            max_tics: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TracingConfig {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            level: default_level(),
        }
    }
}

impl TracingConfig {
    pub fn log_format(&self) -> LogFormat {
        self.format.parse().unwrap_or(LogFormat::Compact)
    }

    pub fn log_level(&self) -> LogLevel {
        self.level.parse().unwrap_or(LogLevel::Info)
    }
}

fn default_port() -> u16 {
    5029
}

fn default_extra_tics() -> Tic {
    1
}

fn default_ticdup() -> Tic {
    1
}

fn default_name() -> String {
    "player".to_string()
}

fn default_color() -> String {
    "40 cf 00".to_string()
}

fn default_map() -> String {
    "MAP01".to_string()
}

fn default_format() -> String {
    "compact".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

fn bad_config(msg: String) -> NetError {
    NetError::InvalidConfig(msg)
}

impl NetConfig {
    pub fn is_solo(&self) -> bool {
        self.players.len() <= 1
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            extra_tics: self.extra_tics,
            ticdup: self.ticdup,
            single_tics: self.is_solo(),
        }
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.players.len() > MAX_NODES {
            return Err(bad_config(format!(
                "{} players configured, at most {} supported",
                self.players.len(),
                MAX_NODES
            )));
        }
        if !self.players.is_empty() && self.console_player >= self.players.len() {
            return Err(bad_config(format!(
                "console_player {} is not in the player list",
                self.console_player
            )));
        }
        self.session_config().validate()?;
        self.peer_addrs()?;
        Ok(())
    }

    fn parse_addr(s: &str) -> Result<SocketAddr, NetError> {
        s.parse::<SocketAddr>()
            .map_err(|e| bad_config(format!("bad address '{}': {}", s, e)))
    }

    /// Port to bind: the one listed for us, or `port`.
    pub fn bind_port(&self) -> Result<u16, NetError> {
        match self.players.get(self.console_player) {
            Some(own) => Ok(Self::parse_addr(own)?.port()),
            None => Ok(self.port),
        }
    }

    /// Remote addresses in node order: every other player, ascending.
    pub fn peer_addrs(&self) -> Result<Vec<SocketAddr>, NetError> {
        self.players
            .iter()
            .enumerate()
            .filter(|(player, _)| *player != self.console_player)
            .map(|(_, addr)| Self::parse_addr(addr))
            .collect()
    }

    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            name: self.name.clone(),
            team: self.team,
            color: self.color.clone(),
        }
    }

    /// Only the arbitrator's copy is used.
    pub fn game_info(&self) -> GameInfo {
        GameInfo {
            map: self.map.clone(),
            rng_seed: self.rng_seed.unwrap_or_else(rand::random),
            settings: self.settings.clone(),
        }
    }
}

/// Load lockstep.toml (optional) and `LOCKSTEP__SECTION__KEY` environment
/// overrides, falling back to defaults when they do not parse.
pub fn load_config() -> NodeConfig {
    let loaded = Config::builder()
        .add_source(File::with_name(CONFIG_NAME).required(false))
        .add_source(
            Environment::with_prefix("LOCKSTEP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize::<NodeConfig>());

    match loaded {
        Ok(config) => {
            eprintln!("Configuration loaded from {}.toml", CONFIG_NAME);
            config
        }
        Err(e) => {
            eprintln!("Failed to load {}.toml: {}", CONFIG_NAME, e);
            eprintln!("Using default configuration");
            NodeConfig::default()
        }
    }
}
