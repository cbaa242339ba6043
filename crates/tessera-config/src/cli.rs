//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, RangeMode};

/// Tessera command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tessera", about = "Streamed quadtree terrain tile cache")]
pub struct CliArgs {
    /// Vertices along one tile edge.
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Target on-screen tile size in pixels.
    #[arg(long)]
    pub pixel_size: Option<f32>,

    /// Subdivision policy.
    #[arg(long, value_enum)]
    pub range_mode: Option<RangeMode>,

    /// Finest level of detail.
    #[arg(long)]
    pub max_lod: Option<u32>,

    /// Loader worker threads (0 = auto).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Wait for a tile's own data before subdividing it.
    #[arg(long)]
    pub progressive: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 600)]
    pub frames: u64,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(size) = args.tile_size {
            self.terrain.tile_size = size;
        }
        if let Some(pixels) = args.pixel_size {
            self.terrain.tile_pixel_size = pixels;
        }
        if let Some(mode) = args.range_mode {
            self.terrain.range_mode = mode;
        }
        if let Some(lod) = args.max_lod {
            self.terrain.max_lod = lod;
        }
        if let Some(workers) = args.workers {
            self.loader.worker_threads = workers;
        }
        if let Some(progressive) = args.progressive {
            self.terrain.progressive = progressive;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
