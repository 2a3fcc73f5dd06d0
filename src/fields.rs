// Structured logging field definitions
// This module centralizes all field names used in tracing logs

#![allow(dead_code)]

// Connection & Network fields
pub const ADDR: &str = "addr";
pub const PORT: &str = "port";
pub const NODE: &str = "node";
pub const NUM_NODES: &str = "num_nodes";
pub const PACKET_SIZE: &str = "packet_size";

// Player fields
pub const PLAYER: &str = "player";
pub const USER_NAME: &str = "user_name";
pub const ARBITRATOR: &str = "arbitrator";

// Tic fields
pub const TIC: &str = "tic";
pub const START_TIC: &str = "start_tic";
pub const NUM_TICS: &str = "num_tics";
pub const MAKETIC: &str = "maketic";
pub const GAMETIC: &str = "gametic";
pub const LOWTIC: &str = "lowtic";

// Game fields
pub const MAP: &str = "map";
pub const RNG_SEED: &str = "rng_seed";
pub const SPECIAL_SIZE: &str = "special_size";

// Operation fields
pub const STATUS: &str = "status";
pub const ERROR: &str = "error";
pub const REASON: &str = "reason";

// Stats fields
pub const DESYNCS: &str = "desyncs";
pub const DROPPED_PACKETS: &str = "dropped_packets";
pub const STALLS: &str = "stalls";

// Server fields
pub const CONFIG_SOURCE: &str = "config_source";
