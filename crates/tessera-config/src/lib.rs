//! Configuration system for the tessera terrain tile cache.
//!
//! Settings persist to disk as RON files, can be overridden from the command
//! line via clap, and support hot-reload detection. Every section uses
//! `#[serde(default)]` so older and newer files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugOptions, LoaderOptions, RangeMode, TerrainOptions, default_config_dir,
};
pub use error::ConfigError;

/// Deepest level of detail a tile key can address.
pub const MAX_LOD: u32 = 30;
