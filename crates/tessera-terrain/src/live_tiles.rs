//! Registry of live tiles by key, used for neighbour lookup.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

use crate::tile_key::TileKey;
use crate::tile_node::TileNode;

/// Live tiles keyed by [`TileKey`]. Entries are weak: the tree owns tiles.
#[derive(Default)]
pub struct LiveTiles {
    tiles: DashMap<TileKey, Weak<TileNode>>,
}

impl LiveTiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tile`. With `notify_neighbors`, the tiles west and north of
    /// it learn about their new east/south neighbour, and `tile` learns about
    /// its own east and south neighbours if they already exist.
    pub fn add(&self, tile: &Arc<TileNode>, notify_neighbors: bool) {
        let key = *tile.key();
        self.tiles.insert(key, Arc::downgrade(tile));
        trace!(%key, "tile registered");
        if !notify_neighbors {
            return;
        }

        for (dx, dy) in [(-1, 0), (0, -1)] {
            if let Some(other) = self.get(&key.neighbor_key(dx, dy)) {
                other.notify_of_arrival(tile);
            }
        }
        for (dx, dy) in [(1, 0), (0, 1)] {
            if let Some(other) = self.get(&key.neighbor_key(dx, dy)) {
                tile.notify_of_arrival(&other);
            }
        }
    }

    /// Drop the entry for `key`.
    pub fn remove(&self, key: &TileKey) {
        self.tiles.remove(key);
    }

    /// The live tile for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &TileKey) -> Option<Arc<TileNode>> {
        self.tiles.get(key).and_then(|weak| weak.upgrade())
    }

    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of registered entries, including any not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Remove entries whose tile has been dropped. Returns how many were removed.
    pub fn purge_dead(&self) -> usize {
        let before = self.tiles.len();
        self.tiles.retain(|_, weak| weak.strong_count() > 0);
        before - self.tiles.len()
    }
}
