//! The context threaded through every tile operation: options, lookup tables,
//! the registry and the host's collaborators.

use std::sync::Arc;

use tessera_config::TerrainOptions;
use tracing::trace;

use crate::culler::ComputeRangeCallback;
use crate::geometry::{GeometryPool, MaskGenerator};
use crate::layer::{LayerUid, TileModelSource};
use crate::live_tiles::LiveTiles;
use crate::loader::Loader;
use crate::render_model::RenderBindings;
use crate::selection_info::SelectionInfo;
use crate::surface::ModifyBoundingBox;
use crate::tile_key::{Profile, TileKey};

/// Receives notice that a tile appeared or its elevation changed.
pub trait TileNotifier: Send + Sync {
    fn on_tile_added(&self, key: &TileKey);
}

/// Shared state for one terrain engine.
pub struct EngineContext {
    pub options: TerrainOptions,
    pub profile: Profile,
    pub bindings: RenderBindings,
    pub selection_info: SelectionInfo,
    pub live_tiles: LiveTiles,
    pub loader: Arc<dyn Loader>,
    pub source: Arc<dyn TileModelSource>,
    pub geometry_pool: Arc<dyn GeometryPool>,
    pub masks: Option<Arc<dyn MaskGenerator>>,
    pub modify_bbox: Option<Arc<dyn ModifyBoundingBox>>,
    pub notifier: Option<Arc<dyn TileNotifier>>,
    pub compute_range: Option<Arc<dyn ComputeRangeCallback>>,
}

impl EngineContext {
    /// Build a context with no shared layers and no optional collaborators.
    ///
    /// # Panics
    ///
    /// Panics if the options' LOD range is invalid (see [`SelectionInfo::new`]).
    #[must_use]
    pub fn new(
        options: TerrainOptions,
        profile: Profile,
        source: Arc<dyn TileModelSource>,
        loader: Arc<dyn Loader>,
        geometry_pool: Arc<dyn GeometryPool>,
    ) -> Self {
        let bindings = RenderBindings::from_options(&options, &[]);
        let selection_info = SelectionInfo::from_options(&options, &profile);
        Self {
            options,
            profile,
            bindings,
            selection_info,
            live_tiles: LiveTiles::new(),
            loader,
            source,
            geometry_pool,
            masks: None,
            modify_bbox: None,
            notifier: None,
            compute_range: None,
        }
    }

    /// Give each layer in `shared` its own shared sampler slot.
    #[must_use]
    pub fn with_shared_layers(mut self, shared: &[LayerUid]) -> Self {
        self.bindings = RenderBindings::from_options(&self.options, shared);
        self
    }

    #[must_use]
    pub fn with_masks(mut self, masks: Arc<dyn MaskGenerator>) -> Self {
        self.masks = Some(masks);
        self
    }

    #[must_use]
    pub fn with_modify_bbox(mut self, modifier: Arc<dyn ModifyBoundingBox>) -> Self {
        self.modify_bbox = Some(modifier);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn TileNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn with_compute_range(mut self, callback: Arc<dyn ComputeRangeCallback>) -> Self {
        self.compute_range = Some(callback);
        self
    }

    /// Forward a tile-added notification to the host.
    pub fn notify_tile_added(&self, key: &TileKey) {
        trace!(%key, "notify tile added");
        if let Some(notifier) = &self.notifier {
            notifier.on_tile_added(key);
        }
    }
}
