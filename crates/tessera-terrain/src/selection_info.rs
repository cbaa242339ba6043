//! Per-level visibility ranges and morph bands, built once from configuration.

use tessera_config::TerrainOptions;

use crate::tile_key::{Profile, TileKey};

/// Empirical divisor turning a tile's bounding diameter into a visibility range.
const RANGE_DIVISOR: f64 = 1.405;

/// Visibility and morph parameters for one level of detail.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisParameters {
    /// Distance within which this level is drawn.
    pub visibility_range: f64,
    /// `visibility_range` squared.
    pub visibility_range2: f64,
    /// Distance at which geometry starts morphing toward the coarser level.
    pub morph_start: f64,
    /// Distance at which the morph completes.
    pub morph_end: f64,
}

/// Read-only level-of-detail table indexed by LOD.
#[derive(Clone, Debug)]
pub struct SelectionInfo {
    first_lod: u32,
    params: Vec<VisParameters>,
}

impl SelectionInfo {
    /// Build the table for LODs `0..=max_lod`.
    ///
    /// # Panics
    ///
    /// Panics if `first_lod > max_lod`, `max_lod` exceeds [`TileKey::MAX_LOD`],
    /// or `morph_start_ratio` is outside `[0, 1)`.
    #[must_use]
    pub fn new(
        first_lod: u32,
        max_lod: u32,
        profile: &Profile,
        min_tile_range_factor: f64,
        morph_start_ratio: f64,
    ) -> Self {
        assert!(first_lod <= max_lod, "first_lod must not exceed max_lod");
        assert!(max_lod <= TileKey::MAX_LOD, "max_lod exceeds TileKey::MAX_LOD");
        assert!(
            (0.0..1.0).contains(&morph_start_ratio),
            "morph_start_ratio must be in [0, 1)"
        );

        let mut params: Vec<VisParameters> = (0..=max_lod)
            .map(|lod| {
                let radius = TileKey::new(lod, 0, 0, *profile).extent().bounding_radius();
                let range = radius * min_tile_range_factor * 2.0 / RANGE_DIVISOR;
                VisParameters {
                    visibility_range: range,
                    visibility_range2: range * range,
                    morph_start: 0.0,
                    morph_end: 0.0,
                }
            })
            .collect();

        // Bands are laid out from the finest level outward.
        let mut prev_end = 0.0;
        for vp in params.iter_mut().rev() {
            let end = vp.visibility_range;
            vp.morph_end = end;
            vp.morph_start = prev_end + (end - prev_end) * morph_start_ratio;
            prev_end = end;
        }

        Self { first_lod, params }
    }

    /// Build the table from terrain options.
    #[must_use]
    pub fn from_options(options: &TerrainOptions, profile: &Profile) -> Self {
        Self::new(
            options.first_lod,
            options.max_lod,
            profile,
            options.min_tile_range_factor,
            options.morph_start_ratio,
        )
    }

    /// Number of levels (`max_lod + 1`).
    #[must_use]
    pub fn num_lods(&self) -> u32 {
        self.params.len() as u32
    }

    #[must_use]
    pub fn first_lod(&self) -> u32 {
        self.first_lod
    }

    #[must_use]
    pub fn max_lod(&self) -> u32 {
        self.num_lods() - 1
    }

    /// Parameters for `lod`, clamped to the finest level.
    #[must_use]
    pub fn vis_parameters(&self, lod: u32) -> &VisParameters {
        let index = (lod as usize).min(self.params.len() - 1);
        &self.params[index]
    }

    /// `(end / (end - start), 1 / (end - start))` for `lod`, as consumed by the morph shader.
    #[must_use]
    pub fn morph_constants(&self, lod: u32) -> (f32, f32) {
        let vp = self.vis_parameters(lod);
        let one_by_span = 1.0 / (vp.morph_end - vp.morph_start) as f32;
        (vp.morph_end as f32 * one_by_span, one_by_span)
    }
}
