//! Shared tile meshes and the masking boundaries that can cut them away.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::tile_key::{Extent, TileKey};

/// Mesh data shared by every tile with the same key and tile size.
#[derive(Clone, Debug, PartialEq)]
pub struct SharedGeometry {
    pub key: TileKey,
    pub tile_size: u32,
    /// Surviving grid vertices after masking.
    pub vertex_count: u32,
    /// Projected extent covered by the mesh.
    pub extent: Extent,
}

impl SharedGeometry {
    /// True when masking removed every vertex.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }
}

/// Decides which parts of the terrain are cut away by masking boundaries.
pub trait MaskGenerator: Send + Sync {
    /// True if the tile's whole footprint is masked.
    fn contains_tile(&self, key: &TileKey) -> bool;

    /// True if any part of the tile is masked.
    fn intersects_tile(&self, key: &TileKey) -> bool;

    /// True if the projected point is masked.
    fn is_masked(&self, x: f64, y: f64) -> bool;
}

/// Masks the terrain inside a set of projected rectangles.
#[derive(Clone, Debug, Default)]
pub struct RectMaskGenerator {
    boundaries: Vec<Extent>,
}

impl RectMaskGenerator {
    #[must_use]
    pub fn new(boundaries: Vec<Extent>) -> Self {
        Self { boundaries }
    }
}

impl MaskGenerator for RectMaskGenerator {
    fn contains_tile(&self, key: &TileKey) -> bool {
        let extent = key.extent();
        self.boundaries.iter().any(|b| b.contains(&extent))
    }

    fn intersects_tile(&self, key: &TileKey) -> bool {
        let extent = key.extent();
        self.boundaries.iter().any(|b| b.intersects(&extent))
    }

    fn is_masked(&self, x: f64, y: f64) -> bool {
        self.boundaries
            .iter()
            .any(|b| x > b.x_min && x < b.x_max && y > b.y_min && y < b.y_max)
    }
}

/// Supplies shared meshes for tiles.
pub trait GeometryPool: Send + Sync {
    fn pooled_geometry(
        &self,
        key: &TileKey,
        tile_size: u32,
        masks: Option<&dyn MaskGenerator>,
    ) -> Arc<SharedGeometry>;

    /// Forget the cached mesh for `key` at `tile_size`.
    fn release(&self, key: &TileKey, tile_size: u32);
}

/// A regular `tile_size × tile_size` grid per tile, cached by key.
///
/// Meshes cut by a mask are built fresh every time and never cached.
#[derive(Debug, Default)]
pub struct PlanarGeometryPool {
    cache: DashMap<(TileKey, u32), Arc<SharedGeometry>>,
}

impl PlanarGeometryPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached meshes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn build(key: &TileKey, tile_size: u32, masks: Option<&dyn MaskGenerator>) -> SharedGeometry {
        let extent = key.extent();
        let full = tile_size * tile_size;
        let vertex_count = match masks {
            Some(masks) if masks.contains_tile(key) => 0,
            Some(masks) if masks.intersects_tile(key) => {
                let step = 1.0 / f64::from(tile_size.max(2) - 1);
                let mut kept = 0;
                for row in 0..tile_size {
                    for col in 0..tile_size {
                        let x = extent.x_min + extent.width() * f64::from(col) * step;
                        let y = extent.y_min + extent.height() * f64::from(row) * step;
                        if !masks.is_masked(x, y) {
                            kept += 1;
                        }
                    }
                }
                kept
            }
            _ => full,
        };
        SharedGeometry {
            key: *key,
            tile_size,
            vertex_count,
            extent,
        }
    }
}

impl GeometryPool for PlanarGeometryPool {
    fn pooled_geometry(
        &self,
        key: &TileKey,
        tile_size: u32,
        masks: Option<&dyn MaskGenerator>,
    ) -> Arc<SharedGeometry> {
        if masks.is_some_and(|m| m.intersects_tile(key)) {
            trace!(%key, "building masked geometry");
            return Arc::new(Self::build(key, tile_size, masks));
        }
        self.cache
            .entry((*key, tile_size))
            .or_insert_with(|| Arc::new(Self::build(key, tile_size, None)))
            .clone()
    }

    fn release(&self, key: &TileKey, tile_size: u32) {
        self.cache.remove(&(*key, tile_size));
    }
}
