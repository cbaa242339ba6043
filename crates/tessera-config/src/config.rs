//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Tile selection, subdivision and expiry settings.
    pub terrain: TerrainOptions,
    /// Background loader settings.
    pub loader: LoaderOptions,
    /// Debug/development settings.
    pub debug: DebugOptions,
}

/// How a tile decides whether its children are in range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum RangeMode {
    /// Subdivide when the tile's projected size exceeds the pixel threshold.
    PixelSizeOnScreen,
    /// Subdivide when a child box intersects the next level's visibility range.
    Distance,
}

/// Terrain tile cache options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainOptions {
    /// Number of vertices along one edge of a tile mesh.
    pub tile_size: u32,
    /// Target on-screen size of one tile in pixels (pixel-size range mode).
    pub tile_pixel_size: f32,
    /// Subdivision policy.
    pub range_mode: RangeMode,
    /// Multiplier applied to a tile's bounding radius to get its visibility range.
    pub min_tile_range_factor: f64,
    /// Coarsest level of detail that is ever created.
    pub first_lod: u32,
    /// Finest level of detail.
    pub max_lod: u32,
    /// Do not subdivide a tile until its own data has arrived.
    pub progressive: bool,
    /// Load finer tiles before coarser ones.
    pub high_resolution_first: bool,
    /// Minimum number of frames a tile stays resident after it was last traversed.
    pub min_expiry_frames: Option<u32>,
    /// Minimum time in seconds a tile stays resident after it was last traversed.
    pub min_expiry_time: Option<f64>,
    /// Copy neighbour edge normals into each normal map so seams match.
    pub normalize_edges: bool,
    /// Bind the parent's color texture for cross-LOD blending.
    pub color_parent_blending: bool,
    /// Bind per-tile normal maps.
    pub normal_maps: bool,
    /// Fraction of each visibility band after which geometry morphing starts.
    pub morph_start_ratio: f64,
    /// Upper bound on subtree evictions per frame (unbounded when unset).
    pub max_unloads_per_frame: Option<usize>,
}

/// Background loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderOptions {
    /// Worker thread count (0 = derive from CPU count).
    pub worker_threads: usize,
    /// Maximum number of queued requests dispatched to workers per frame.
    pub max_requests_per_frame: usize,
    /// Bounded capacity of the completed-result channel.
    pub result_capacity: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugOptions {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Replay previously accepted tiles without making LOD decisions.
    pub stealth: bool,
}

// --- Default implementations ---

impl Default for TerrainOptions {
    fn default() -> Self {
        Self {
            tile_size: 17,
            tile_pixel_size: 256.0,
            range_mode: RangeMode::PixelSizeOnScreen,
            min_tile_range_factor: 7.0,
            first_lod: 0,
            max_lod: 19,
            progressive: false,
            high_resolution_first: true,
            min_expiry_frames: None,
            min_expiry_time: None,
            normalize_edges: false,
            color_parent_blending: true,
            normal_maps: true,
            morph_start_ratio: 0.66,
            max_unloads_per_frame: None,
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_requests_per_frame: 16,
            result_capacity: 256,
        }
    }
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stealth: false,
        }
    }
}

impl TerrainOptions {
    /// Number of levels of detail between `first_lod` and `max_lod`, inclusive.
    #[must_use]
    pub fn num_lods(&self) -> u32 {
        self.max_lod.saturating_sub(self.first_lod) + 1
    }

    /// Reject options that cannot describe a tile tree.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_lod > self.max_lod {
            return Err(ConfigError::InvalidLodRange {
                first_lod: self.first_lod,
                max_lod: self.max_lod,
            });
        }
        if self.max_lod > crate::MAX_LOD {
            return Err(ConfigError::LodTooDeep(self.max_lod));
        }
        if !(0.0..1.0).contains(&self.morph_start_ratio) {
            return Err(ConfigError::InvalidMorphRatio(self.morph_start_ratio));
        }
        if self.tile_size < 2 {
            return Err(ConfigError::InvalidTileSize(self.tile_size));
        }
        Ok(())
    }
}

/// Platform config directory for tessera (`~/.config/tessera` on Linux).
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    ///
    /// A file whose terrain options fail [`TerrainOptions::validate`] is an error.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.terrain.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.terrain.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
