//! Errors raised while loading, saving or validating tessera configuration.

/// A config file that could not be read, parsed or written, or whose terrain
/// options describe a tree the engine cannot build.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// The coarsest level lies below the finest.
    #[error("invalid LOD range: first_lod {first_lod} > max_lod {max_lod}")]
    InvalidLodRange { first_lod: u32, max_lod: u32 },

    #[error("max_lod {0} exceeds the deepest supported level {max}", max = crate::MAX_LOD)]
    LodTooDeep(u32),

    #[error("morph_start_ratio {0} must be in [0, 1)")]
    InvalidMorphRatio(f64),

    /// A tile mesh needs at least two vertices per edge.
    #[error("tile_size {0} must be at least 2")]
    InvalidTileSize(u32),
}
