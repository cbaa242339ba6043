//! The terrain engine: root tiles, per-frame cull and update, dormancy sweep.

use std::sync::{Arc, Mutex, PoisonError};

use tessera_config::{Config, ConfigError, TerrainOptions};
use tracing::{debug, info};

use crate::context::{EngineContext, TileNotifier};
use crate::culler::{FrameStamp, TerrainCuller};
use crate::geometry::GeometryPool;
use crate::layer::{LayerFilter, TileModelSource};
use crate::loader::{LoaderError, PagerLoader};
use crate::tile_key::{Profile, TileKey};
use crate::tile_node::TileNode;

/// Errors raised while building an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid terrain options: {0}")]
    Options(#[from] ConfigError),

    #[error("profile has more than u32::MAX tiles per axis at LOD {0}")]
    TooManyTiles(u32),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}

/// What one [`TerrainEngine::update`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Requests handed to workers.
    pub dispatched: usize,
    /// Delivered results merged into tiles.
    pub merged: usize,
    /// Subtrees evicted by the dormancy sweep.
    pub evicted: usize,
    /// Requests still waiting in the queue.
    pub queued: usize,
    /// Requests running on workers.
    pub in_flight: u64,
    /// Registered tiles after the sweep.
    pub live_tiles: usize,
}

/// Owns the quadtree roots and serialises every tree mutation.
pub struct TerrainEngine {
    ctx: EngineContext,
    roots: Vec<Arc<TileNode>>,
    mutation: Mutex<()>,
}

fn validate(options: &TerrainOptions, profile: &Profile) -> Result<(), EngineError> {
    options.validate()?;
    if profile.checked_num_tiles(options.max_lod).is_none() {
        return Err(EngineError::TooManyTiles(options.max_lod));
    }
    Ok(())
}

impl TerrainEngine {
    /// Build an engine with a [`PagerLoader`] over `source`.
    pub fn new(
        config: &Config,
        profile: Profile,
        source: Arc<dyn TileModelSource>,
        geometry_pool: Arc<dyn GeometryPool>,
        notifier: Option<Arc<dyn TileNotifier>>,
    ) -> Result<Self, EngineError> {
        validate(&config.terrain, &profile)?;
        let loader = Arc::new(PagerLoader::new(Arc::clone(&source), &config.loader)?);
        let mut ctx = EngineContext::new(config.terrain.clone(), profile, source, loader, geometry_pool);
        if let Some(notifier) = notifier {
            ctx = ctx.with_notifier(notifier);
        }
        Self::from_context(ctx)
    }

    /// Build an engine around a prepared context. Root tiles at `first_lod`
    /// are created and loaded synchronously.
    pub fn from_context(ctx: EngineContext) -> Result<Self, EngineError> {
        validate(&ctx.options, &ctx.profile)?;
        let roots: Vec<Arc<TileNode>> = ctx
            .profile
            .root_keys(ctx.options.first_lod)
            .into_iter()
            .map(|key| TileNode::create(key, None, &ctx))
            .collect();
        for root in &roots {
            root.load_sync(&ctx);
        }
        info!(
            roots = roots.len(),
            first_lod = ctx.options.first_lod,
            max_lod = ctx.options.max_lod,
            "terrain engine ready"
        );
        Ok(Self {
            ctx,
            roots,
            mutation: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    #[must_use]
    pub fn roots(&self) -> &[Arc<TileNode>] {
        &self.roots
    }

    /// Traverse every root. Accepted surfaces collect in the culler.
    pub fn cull(&self, culler: &mut TerrainCuller) {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        for root in &self.roots {
            root.accept(culler, &self.ctx);
        }
    }

    /// Merge delivered loads, start this frame's queued loads and evict
    /// dormant subtrees. `stamp` must be the stamp the frame was culled with.
    pub fn update(&self, stamp: FrameStamp) -> UpdateStats {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let loader = &self.ctx.loader;

        let merged = loader
            .drain_results()
            .iter()
            .filter(|request| request.apply(&self.ctx))
            .count();
        let dispatched = loader.dispatch(stamp.frame_number);

        let mut budget = self.ctx.options.max_unloads_per_frame.unwrap_or(usize::MAX);
        let mut evicted = 0;
        for root in &self.roots {
            Self::sweep(root, stamp, &self.ctx, &mut budget, &mut evicted);
        }
        self.ctx.live_tiles.purge_dead();

        let stats = UpdateStats {
            dispatched,
            merged,
            evicted,
            queued: loader.queued(),
            in_flight: loader.in_flight(),
            live_tiles: self.ctx.live_tiles.len(),
        };
        if evicted > 0 || merged > 0 {
            debug!(frame = stamp.frame_number, ?stats, "terrain update");
        }
        stats
    }

    fn sweep(tile: &Arc<TileNode>, stamp: FrameStamp, ctx: &EngineContext, budget: &mut usize, evicted: &mut usize) {
        if *budget == 0 {
            return;
        }
        if tile.are_sub_tiles_dormant(stamp) {
            tile.remove_sub_tiles(ctx);
            *budget -= 1;
            *evicted += 1;
            return;
        }
        for child in tile.children() {
            Self::sweep(&child, stamp, ctx, budget, evicted);
        }
    }

    /// Ask every live tile to reload just the layers in `filter`.
    pub fn refresh_layers(&self, filter: &LayerFilter) {
        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stack: Vec<Arc<TileNode>> = self.roots.clone();
        while let Some(tile) = stack.pop() {
            tile.refresh_layers(filter.clone());
            stack.extend(tile.children());
        }
    }

    /// The live tile for `key`.
    #[must_use]
    pub fn tile(&self, key: &TileKey) -> Option<Arc<TileNode>> {
        self.ctx.live_tiles.get(key)
    }

    #[must_use]
    pub fn live_tile_count(&self) -> usize {
        self.ctx.live_tiles.len()
    }
}
