//! Layer identities, load filters and the delivered per-tile data model.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::Mat4;

use crate::render_model::TextureHandle;
use crate::tile_key::TileKey;

/// Stable unique id of a data layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerUid(pub u32);

impl fmt::Display for LayerUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Restricts a load to a subset of layers. An empty filter means every layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerFilter {
    layers: BTreeSet<LayerUid>,
}

impl LayerFilter {
    /// A filter that accepts every layer.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter accepting only the given layers.
    #[must_use]
    pub fn only(layers: impl IntoIterator<Item = LayerUid>) -> Self {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn accepts_all(&self) -> bool {
        self.layers.is_empty()
    }

    #[must_use]
    pub fn contains(&self, uid: LayerUid) -> bool {
        self.layers.is_empty() || self.layers.contains(&uid)
    }

    /// Widen this filter by `other`. Merging with an all-layer filter yields all layers.
    pub fn merge(&mut self, other: &LayerFilter) {
        if self.accepts_all() || other.accepts_all() {
            self.layers.clear();
        } else {
            self.layers.extend(other.layers.iter().copied());
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = LayerUid> + '_ {
        self.layers.iter().copied()
    }
}

/// Data delivered for one layer of one tile.
#[derive(Clone, Debug)]
pub enum LayerModel {
    /// An imagery layer texture with its tile matrix.
    Image {
        uid: LayerUid,
        texture: TextureHandle,
        matrix: Mat4,
    },
    /// A color layer that renders without a texture of its own (e.g. splatting).
    Color { uid: LayerUid },
    /// The tile's elevation raster.
    Elevation { texture: TextureHandle },
    /// The tile's normal map.
    Normal { texture: TextureHandle },
    /// A layer bound through one of the shared sampler slots.
    Shared { uid: LayerUid, texture: TextureHandle },
    /// A patch layer; carries no sampler data.
    Patch { uid: LayerUid },
}

impl LayerModel {
    /// The layer uid, for kinds that have one.
    #[must_use]
    pub fn uid(&self) -> Option<LayerUid> {
        match self {
            LayerModel::Image { uid, .. }
            | LayerModel::Color { uid }
            | LayerModel::Shared { uid, .. }
            | LayerModel::Patch { uid } => Some(*uid),
            LayerModel::Elevation { .. } | LayerModel::Normal { .. } => None,
        }
    }
}

/// Everything a data source delivered for one tile.
#[derive(Clone, Debug)]
pub struct TerrainTileModel {
    pub key: TileKey,
    pub layers: Vec<LayerModel>,
}

impl TerrainTileModel {
    #[must_use]
    pub fn new(key: TileKey) -> Self {
        Self {
            key,
            layers: Vec::new(),
        }
    }

    /// Builder-style layer append.
    #[must_use]
    pub fn with(mut self, layer: LayerModel) -> Self {
        self.layers.push(layer);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Cooperative cancellation flag shared between a request and the job running it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear a previous cancellation so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The data-source collaborator that produces per-tile layer data.
///
/// Implementations run on loader worker threads. Returning `None` (or a model
/// missing some layers) is a load failure: the tile stays dirty and keeps
/// drawing inherited data.
pub trait TileModelSource: Send + Sync {
    fn create_tile_model(
        &self,
        key: &TileKey,
        filter: &LayerFilter,
        cancel: &CancelToken,
    ) -> Option<TerrainTileModel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = LayerFilter::all();
        assert!(filter.accepts_all());
        assert!(filter.contains(LayerUid(42)));
    }

    #[test]
    fn test_narrow_filter() {
        let filter = LayerFilter::only([LayerUid(1), LayerUid(2)]);
        assert!(filter.contains(LayerUid(1)));
        assert!(!filter.contains(LayerUid(3)));
    }

    #[test]
    fn test_merge_widens() {
        let mut filter = LayerFilter::only([LayerUid(1)]);
        filter.merge(&LayerFilter::only([LayerUid(5)]));
        assert_eq!(filter.layers().collect::<Vec<_>>(), vec![LayerUid(1), LayerUid(5)]);

        filter.merge(&LayerFilter::all());
        assert!(filter.accepts_all());
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
