//! The quadtree node: lazy subdivision, cull-time LOD selection, data merge,
//! inheritance refresh, neighbour seam stitching and dormancy.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use glam::{DVec3, Mat4, Vec4};
use image::Rgba;
use tessera_config::RangeMode;
use tracing::{debug, trace};

use crate::context::EngineContext;
use crate::culler::{CameraKind, DrawTile, FrameStamp, TerrainCuller};
use crate::layer::{LayerFilter, LayerModel, TerrainTileModel};
use crate::loader::{LoadRequest, load_priority};
use crate::render_model::{
    RenderBindings, RenderModel, RenderingPass, Sampler, SamplerSlot, TextureHandle,
};
use crate::surface::{BoundingBox, SurfaceNode};
use crate::tile_key::TileKey;

/// Lower bound on the frames a tile must go untraversed before it is dormant.
pub const MIN_EXPIRY_FRAMES_FLOOR: u32 = 3;

/// Tile x/y are encoded modulo 2^16 to fit single-precision shader registers.
const TILE_KEY_MODULUS: u32 = 65_536;

const NEVER: u64 = u64::MAX;

/// One node of the terrain quadtree.
///
/// A tile has either no children or exactly four. Children are created
/// together under the node's mutex and removed together on eviction.
pub struct TileNode {
    key: TileKey,
    /// `None` when masking left the tile without geometry.
    surface: Option<SurfaceNode>,
    render_model: RwLock<RenderModel>,
    children: Mutex<Vec<Arc<TileNode>>>,
    children_ready: AtomicBool,
    dirty: AtomicBool,
    new_layers: Mutex<Option<LayerFilter>>,
    load_request: Option<Arc<LoadRequest>>,
    last_traversal_frame: AtomicU64,
    last_traversal_time: AtomicU64,
    last_accept_surface_frame: AtomicU64,
    min_expiry_frames: u32,
    min_expiry_time: f64,
    stitch_normal_map: bool,
    east: Mutex<Weak<TileNode>>,
    south: Mutex<Weak<TileNode>>,
    morph_constants: (f32, f32),
}

impl std::fmt::Debug for TileNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileNode")
            .field("key", &self.key)
            .field("empty", &self.is_empty())
            .field("dirty", &self.is_dirty())
            .field("children_ready", &self.children_ready())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TileNode {
    /// Create the tile for `key`, inheriting `parent`'s render model.
    ///
    /// An empty pooled geometry yields an empty tile that never loads or draws
    /// and is not registered. Otherwise the tile starts dirty, is registered in
    /// the live-tile index and the host is notified.
    pub fn create(key: TileKey, parent: Option<&TileNode>, ctx: &EngineContext) -> Arc<TileNode> {
        let options = &ctx.options;
        let geometry = ctx
            .geometry_pool
            .pooled_geometry(&key, options.tile_size, ctx.masks.as_deref());

        let mut render_model = RenderModel::new(&ctx.bindings);
        if let Some(parent) = parent {
            let parent_model = parent.render_model();
            render_model.inherit_from(&parent_model, key.quadrant(), &ctx.bindings);
        }

        let (last_frame, last_time) = parent.map_or((0, 0.0), |p| {
            (p.last_traversal_frame(), p.last_traversal_time())
        });

        let empty = geometry.is_empty();
        let surface = (!empty).then(|| SurfaceNode::new(key, geometry, ctx.modify_bbox.clone()));

        let tile = Arc::new_cyclic(|weak| TileNode {
            key,
            surface,
            render_model: RwLock::new(render_model),
            children: Mutex::new(Vec::new()),
            children_ready: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            new_layers: Mutex::new(None),
            load_request: (!empty).then(|| Arc::new(LoadRequest::new(key, weak.clone()))),
            last_traversal_frame: AtomicU64::new(last_frame),
            last_traversal_time: AtomicU64::new(last_time.to_bits()),
            last_accept_surface_frame: AtomicU64::new(NEVER),
            min_expiry_frames: options.min_expiry_frames.unwrap_or(0),
            min_expiry_time: options.min_expiry_time.unwrap_or(0.0),
            stitch_normal_map: options.normalize_edges,
            east: Mutex::new(Weak::new()),
            south: Mutex::new(Weak::new()),
            morph_constants: ctx.selection_info.morph_constants(key.lod),
        });

        if empty {
            debug!(%key, "tile is empty");
            return tile;
        }

        if ctx.bindings.is_active(SamplerSlot::Elevation) {
            let elevation = tile.render_model().shared_samplers[SamplerSlot::Elevation].clone();
            if let (Some(surface), Some(texture)) = (&tile.surface, elevation.texture) {
                surface.set_elevation_raster(Some(texture), elevation.matrix);
            }
        }
        tile.dirty_bound();
        tile.set_dirty(true);
        ctx.live_tiles.add(&tile, tile.stitch_normal_map);
        trace!(%key, "tile created");
        ctx.notify_tile_added(&key);
        tile
    }

    #[must_use]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    /// True when masking removed all of this tile's geometry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surface.is_none()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn children_ready(&self) -> bool {
        self.children_ready.load(Ordering::Acquire)
    }

    /// Always 0 or 4.
    #[must_use]
    pub fn num_children(&self) -> usize {
        lock(&self.children).len()
    }

    /// A snapshot of the children, in quadrant order.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<TileNode>> {
        lock(&self.children).clone()
    }

    #[must_use]
    pub fn sub_tile(&self, quadrant: usize) -> Option<Arc<TileNode>> {
        lock(&self.children).get(quadrant).cloned()
    }

    /// A snapshot of the render model.
    #[must_use]
    pub fn render_model(&self) -> RenderModel {
        self.render_model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn load_request(&self) -> Option<&Arc<LoadRequest>> {
        self.load_request.as_ref()
    }

    #[must_use]
    pub fn last_traversal_frame(&self) -> u64 {
        self.last_traversal_frame.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_traversal_time(&self) -> f64 {
        f64::from_bits(self.last_traversal_time.load(Ordering::Relaxed))
    }

    /// Frame on which this tile last drew its own surface.
    #[must_use]
    pub fn last_accept_surface_frame(&self) -> Option<u64> {
        let frame = self.last_accept_surface_frame.load(Ordering::Relaxed);
        (frame != NEVER).then_some(frame)
    }

    #[must_use]
    pub fn morph_constants(&self) -> (f32, f32) {
        self.morph_constants
    }

    #[must_use]
    pub fn east_neighbor(&self) -> Option<Arc<TileNode>> {
        lock(&self.east).upgrade()
    }

    #[must_use]
    pub fn south_neighbor(&self) -> Option<Arc<TileNode>> {
        lock(&self.south).upgrade()
    }

    /// World-space bounds. `None` for an empty tile.
    #[must_use]
    pub fn bound(&self) -> Option<BoundingBox> {
        self.surface.as_ref().map(SurfaceNode::bound)
    }

    pub fn dirty_bound(&self) {
        if let Some(surface) = &self.surface {
            surface.dirty_bound();
        }
    }

    #[must_use]
    pub fn elevation_raster(&self) -> Option<TextureHandle> {
        self.surface.as_ref().and_then(SurfaceNode::elevation_raster)
    }

    #[must_use]
    pub fn elevation_matrix(&self) -> Mat4 {
        self.surface
            .as_ref()
            .map_or(Mat4::IDENTITY, SurfaceNode::elevation_matrix)
    }

    /// Update the cached elevation raster used for bounds.
    pub fn set_elevation_raster(&self, texture: Option<TextureHandle>, matrix: Mat4) {
        if let Some(surface) = &self.surface {
            surface.set_elevation_raster(texture, matrix);
        }
    }

    /// `(x mod 2^16, flipped y mod 2^16, lod, max bound size)`; the last
    /// component is -1 for an empty tile.
    #[must_use]
    pub fn tile_key_value(&self) -> Vec4 {
        let (_, rows) = self.key.profile.num_tiles(self.key.lod);
        let x = self.key.x % TILE_KEY_MODULUS;
        let y = (rows - self.key.y - 1) % TILE_KEY_MODULUS;
        let size = self
            .bound()
            .map_or(-1.0, |b| b.width().max(b.height()) as f32);
        Vec4::new(x as f32, y as f32, self.key.lod as f32, size)
    }

    /// Mark the tile's data stale. Clearing the flag while a narrower reload
    /// is queued re-arms it with the queued layers instead.
    pub fn set_dirty(&self, value: bool) {
        self.dirty.store(value, Ordering::Release);
        if value {
            return;
        }
        if let Some(filter) = lock(&self.new_layers).take() {
            if let Some(request) = &self.load_request {
                request.set_filter(filter);
            }
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Request a reload of just the layers in `filter`. While a load is
    /// already pending the layers are queued and requested once it lands.
    pub fn refresh_layers(&self, filter: LayerFilter) {
        let Some(request) = &self.load_request else {
            return;
        };
        if self.is_dirty() {
            let mut queued = lock(&self.new_layers);
            match queued.as_mut() {
                Some(pending) => pending.merge(&filter),
                None => *queued = Some(filter),
            }
        } else {
            request.set_filter(filter);
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Clear shared samplers whose binding has been deactivated.
    pub fn refresh_shared_samplers(&self, bindings: &RenderBindings) {
        self.render_model
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_shared_samplers(bindings);
    }

    /// Whether the view wants this tile's children.
    pub fn should_subdivide(&self, culler: &TerrainCuller, ctx: &EngineContext) -> bool {
        let Some(surface) = &self.surface else {
            return false;
        };
        let si = &ctx.selection_info;
        let lod = self.key.lod;
        if lod >= si.max_lod() {
            return false;
        }

        match ctx.options.range_mode {
            RangeMode::PixelSizeOnScreen => {
                let bound = surface.bound();
                let mut pixel_size = ctx
                    .compute_range
                    .as_ref()
                    .map_or(-1.0, |cb| cb.compute_range(&self.key, &bound, culler));
                if pixel_size <= 0.0 {
                    pixel_size = culler.clamped_pixel_size(&bound);
                }
                pixel_size > f64::from(ctx.options.tile_pixel_size) * 4.0
            }
            RangeMode::Distance => surface.any_child_box_intersects_sphere(
                culler.view_point(),
                si.vis_parameters(lod + 1).visibility_range2,
                culler.lod_scale(),
            ),
        }
    }

    /// Traverse this tile. Empty tiles are skipped.
    pub fn accept(self: &Arc<Self>, culler: &mut TerrainCuller, ctx: &EngineContext) -> bool {
        if self.is_empty() {
            return false;
        }
        if culler.is_stealth() {
            self.cull_stealth(culler, ctx)
        } else {
            self.accept_cull(culler, ctx)
        }
    }

    /// Stamp the traversal, then cull unless the frustum rejects the tile.
    pub fn accept_cull(self: &Arc<Self>, culler: &mut TerrainCuller, ctx: &EngineContext) -> bool {
        let stamp = culler.frame_stamp();
        self.last_traversal_frame
            .store(stamp.frame_number, Ordering::Relaxed);
        self.last_traversal_time
            .store(stamp.reference_time.to_bits(), Ordering::Relaxed);

        match self.bound() {
            Some(bound) if !culler.is_culled(&bound) => self.cull(culler, ctx),
            _ => false,
        }
    }

    /// The per-frame LOD decision for a tile that passed frustum culling.
    pub fn cull(self: &Arc<Self>, culler: &mut TerrainCuller, ctx: &EngineContext) -> bool {
        let Some(surface) = &self.surface else {
            return false;
        };
        if !culler.is_above_horizon(&surface.bound()) {
            return false;
        }

        let children_in_range = self.should_subdivide(culler, ctx);
        let mut can_create_children = children_in_range;
        let mut can_load_data = true;
        let mut can_accept_surface = false;

        // Progressive mode waits for this tile's own data before subdividing.
        if self.is_dirty() && ctx.options.progressive {
            can_create_children = false;
        }

        if culler.camera() == CameraKind::InheritViewpoint {
            can_create_children = false;
            can_load_data = false;
        }

        if children_in_range {
            if !self.children_ready() && can_create_children {
                let mut children = lock(&self.children);
                if !self.children_ready() {
                    self.create_children(&mut children, ctx);
                    self.children_ready.store(true, Ordering::Release);
                    // new children settle for a frame before this tile loads
                    can_load_data = false;
                }
            }

            if self.children_ready() {
                for child in self.children() {
                    child.accept(culler, ctx);
                }
            } else {
                can_accept_surface = true;
            }
        } else {
            can_accept_surface = true;
        }

        if can_accept_surface {
            self.accept_surface(culler);
            self.last_accept_surface_frame
                .store(culler.frame_stamp().frame_number, Ordering::Relaxed);
        }

        if self.is_dirty() && can_load_data {
            self.load(culler, ctx);
        }
        true
    }

    /// Replay recent decisions: redraw a surface accepted in the last two
    /// frames, otherwise descend into existing children.
    pub fn cull_stealth(self: &Arc<Self>, culler: &mut TerrainCuller, ctx: &EngineContext) -> bool {
        let frame = culler.frame_stamp().frame_number;
        let recently_accepted = self
            .last_accept_surface_frame()
            .is_some_and(|last| frame.saturating_sub(last) < 2);

        if recently_accepted {
            self.accept_surface(culler);
        } else if self.children_ready() {
            for child in self.children() {
                child.accept(culler, ctx);
            }
        }
        false
    }

    fn accept_surface(&self, culler: &mut TerrainCuller) {
        culler.push_draw(DrawTile {
            key: self.key,
            tile_key_value: self.tile_key_value(),
            morph_constants: self.morph_constants,
            render_model: self.render_model(),
        });
    }

    // Callers must hold `self.children`.
    fn create_children(&self, children: &mut Vec<Arc<TileNode>>, ctx: &EngineContext) {
        trace!(key = %self.key, "creating children");
        children.clear();
        for quadrant in 0..4 {
            children.push(TileNode::create(self.key.child_key(quadrant), Some(self), ctx));
        }
    }

    /// Submit this tile's persistent request with its LOD and distance priority.
    pub fn load(&self, culler: &TerrainCuller, ctx: &EngineContext) {
        let (Some(request), Some(surface)) = (&self.load_request, &self.surface) else {
            return;
        };
        let si = &ctx.selection_info;
        let (center, _) = surface.bounding_sphere();
        let distance = culler.distance_to_view_point(center, true);
        let priority = load_priority(
            self.key.lod,
            si.num_lods(),
            ctx.options.high_resolution_first,
            distance,
            si.vis_parameters(0).visibility_range,
        );
        if ctx
            .loader
            .load(request, priority, culler.frame_stamp().frame_number)
        {
            trace!(key = %self.key, priority, "load submitted");
        }
    }

    /// Fetch and merge all layers on the calling thread, bypassing the loader.
    pub fn load_sync(self: &Arc<Self>, ctx: &EngineContext) {
        if self.is_empty() {
            return;
        }
        let request = LoadRequest::new(self.key, Arc::downgrade(self));
        request.set_enable_cancellation(false);
        request.invoke(ctx.source.as_ref());
        request.apply(ctx);
    }

    /// Create all four children if needed and load each synchronously.
    pub fn load_children(&self, ctx: &EngineContext) {
        let mut children = lock(&self.children);
        if self.children_ready() {
            return;
        }
        self.create_children(&mut children, ctx);
        self.children_ready.store(true, Ordering::Release);
        for child in children.iter() {
            child.load_sync(ctx);
        }
    }

    /// Install freshly delivered layer data, then push it to ready children.
    pub fn merge(&self, model: &TerrainTileModel, ctx: &EngineContext) {
        let Some(surface) = &self.surface else {
            return;
        };
        let bindings = &ctx.bindings;
        let mut new_elevation = None;
        let mut new_normals = false;

        {
            let mut rm = self
                .render_model
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for layer in &model.layers {
                match layer {
                    LayerModel::Image {
                        uid,
                        texture,
                        matrix,
                    } if bindings.is_active(SamplerSlot::Color) => {
                        let (pass, created) = rm.pass_or_insert(*uid);
                        // A pass first seen at this LOD blends toward itself.
                        if created && bindings.is_active(SamplerSlot::ColorParent) {
                            pass.samplers[SamplerSlot::ColorParent] = Sampler::owned(texture.clone());
                        }
                        pass.samplers[SamplerSlot::Color] = Sampler {
                            texture: Some(texture.clone()),
                            matrix: *matrix,
                        };
                    }
                    LayerModel::Color { uid } if bindings.is_active(SamplerSlot::Color) => {
                        let _ = rm.pass_or_insert(*uid);
                    }
                    LayerModel::Elevation { texture } if bindings.is_active(SamplerSlot::Elevation) => {
                        rm.shared_samplers[SamplerSlot::Elevation] = Sampler::owned(texture.clone());
                        new_elevation = Some(texture.clone());
                    }
                    LayerModel::Normal { texture } if bindings.is_active(SamplerSlot::Normal) => {
                        rm.shared_samplers[SamplerSlot::Normal] = Sampler::owned(texture.clone());
                        new_normals = true;
                    }
                    LayerModel::Shared { uid, texture } => {
                        if let Some(slot) = bindings.shared_slot_for(*uid) {
                            rm.shared_samplers[slot] = Sampler::owned(texture.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        trace!(key = %self.key, layers = model.layers.len(), "merged tile data");

        let elevation_changed = new_elevation.is_some();
        if let Some(texture) = new_elevation {
            surface.set_elevation_raster(Some(texture), Mat4::IDENTITY);
        }
        if new_normals {
            self.update_normal_map();
        }

        if self.children_ready() {
            for child in self.children() {
                child.refresh_inherited_data(self, bindings);
            }
        }

        if elevation_changed {
            ctx.notify_tile_added(&self.key);
        }
    }

    /// Re-inherit every sampler this tile does not own from `parent`, and
    /// always re-derive color-parent from the parent's own color. Recurses
    /// into ready children only when something changed. Returns the number
    /// of samplers changed here.
    pub fn refresh_inherited_data(&self, parent: &TileNode, bindings: &RenderBindings) -> usize {
        let quadrant = self.key.quadrant();
        let blend = bindings.is_active(SamplerSlot::ColorParent);
        let parent_model = parent.render_model();
        let mut changes = 0;
        let mut new_elevation = None;

        {
            let mut rm = self
                .render_model
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            for parent_pass in &parent_model.passes {
                let position = rm
                    .passes
                    .iter()
                    .position(|p| p.source_uid == parent_pass.source_uid);
                let Some(position) = position else {
                    let mut samplers = parent_pass.samplers.for_quadrant(quadrant);
                    if blend {
                        samplers[SamplerSlot::ColorParent] = samplers[SamplerSlot::Color].clone();
                    }
                    rm.passes.push(RenderingPass {
                        source_uid: parent_pass.source_uid,
                        samplers,
                    });
                    changes += 1;
                    continue;
                };
                let pass = &mut rm.passes[position];

                for index in 0..pass.samplers.len() {
                    let slot = SamplerSlot::from_index(index);
                    if slot == SamplerSlot::ColorParent && blend {
                        let parent_color = &parent_pass.samplers[SamplerSlot::Color];
                        let derived = if parent_color.texture.is_some() {
                            parent_color.for_quadrant(quadrant)
                        } else {
                            pass.samplers[SamplerSlot::Color].clone()
                        };
                        if pass.samplers[slot].assign(derived) {
                            changes += 1;
                        }
                    } else if pass.samplers[slot].is_inherited()
                        && pass.samplers[slot].assign(parent_pass.samplers[slot].for_quadrant(quadrant))
                    {
                        changes += 1;
                    }
                }
            }

            for index in SamplerSlot::Elevation.index()..rm.shared_samplers.len() {
                let slot = SamplerSlot::from_index(index);
                let mine = &mut rm.shared_samplers[slot];
                if mine.is_inherited()
                    && mine.assign(parent_model.shared_samplers[slot].for_quadrant(quadrant))
                {
                    changes += 1;
                    if slot == SamplerSlot::Elevation && mine.texture.is_some() {
                        new_elevation = Some(mine.clone());
                    }
                }
            }
        }

        if let Some(elevation) = new_elevation {
            self.set_elevation_raster(elevation.texture, elevation.matrix);
        }

        if changes > 0 {
            self.dirty_bound();
            if self.children_ready() {
                for child in self.children() {
                    child.refresh_inherited_data(self, bindings);
                }
            }
        }
        changes
    }

    /// True once both the frame and the time grace periods have passed
    /// since the last traversal.
    #[must_use]
    pub fn is_dormant(&self, stamp: FrameStamp) -> bool {
        let min_frames = u64::from(self.min_expiry_frames.max(MIN_EXPIRY_FRAMES_FLOOR));
        stamp.frame_number.saturating_sub(self.last_traversal_frame()) > min_frames
            && stamp.reference_time - self.last_traversal_time() > self.min_expiry_time
    }

    /// True when all four children exist and are dormant.
    #[must_use]
    pub fn are_sub_tiles_dormant(&self, stamp: FrameStamp) -> bool {
        let children = lock(&self.children);
        children.len() >= 4 && children.iter().all(|child| child.is_dormant(stamp))
    }

    /// Evict all four children and their subtrees.
    pub fn remove_sub_tiles(&self, ctx: &EngineContext) {
        let removed: Vec<Arc<TileNode>> = {
            let mut children = lock(&self.children);
            self.children_ready.store(false, Ordering::Release);
            children.drain(..).collect()
        };
        for child in &removed {
            child.release(ctx);
        }
        debug!(key = %self.key, "evicted sub tiles");
    }

    fn release(&self, ctx: &EngineContext) {
        ctx.live_tiles.remove(&self.key);
        ctx.geometry_pool.release(&self.key, ctx.options.tile_size);
        if let Some(request) = &self.load_request {
            ctx.loader.cancel(request);
        }
        let removed: Vec<Arc<TileNode>> = {
            let mut children = lock(&self.children);
            self.children_ready.store(false, Ordering::Release);
            children.drain(..).collect()
        };
        for child in &removed {
            child.release(ctx);
        }
    }

    /// Record `that` as the east or south neighbour if it is one, then try
    /// to stitch normals.
    pub fn notify_of_arrival(&self, that: &Arc<TileNode>) {
        if self.key.neighbor_key(1, 0) == that.key {
            *lock(&self.east) = Arc::downgrade(that);
        }
        if self.key.neighbor_key(0, 1) == that.key {
            *lock(&self.south) = Arc::downgrade(that);
        }
        self.update_normal_map();
    }

    fn owned_normal_map(&self) -> Option<TextureHandle> {
        let rm = self.render_model.read().unwrap_or_else(PoisonError::into_inner);
        let sampler = &rm.shared_samplers[SamplerSlot::Normal];
        if sampler.is_owned() {
            sampler.texture.clone()
        } else {
            None
        }
    }

    /// Copy the east neighbour's west column into this tile's east column and
    /// the south neighbour's north row into this tile's south row. Skipped
    /// unless both normal maps are owned and equally sized.
    pub fn update_normal_map(&self) {
        if !self.stitch_normal_map {
            return;
        }
        let Some(this_map) = self.owned_normal_map() else {
            return;
        };
        let (Some(east), Some(south)) = (self.east_neighbor(), self.south_neighbor()) else {
            return;
        };
        let (width, height) = this_map.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        let Some(east_map) = east.owned_normal_map() else {
            return;
        };
        if east_map.dimensions() != (width, height) {
            return;
        }
        let column: Vec<Rgba<f32>> = {
            let image = east_map.image();
            (0..height).map(|row| *image.get_pixel(0, row)).collect()
        };
        {
            let mut image = this_map.image_mut();
            for (row, texel) in column.into_iter().enumerate() {
                image.put_pixel(width - 1, row as u32, texel);
            }
        }

        let Some(south_map) = south.owned_normal_map() else {
            return;
        };
        if south_map.dimensions() != (width, height) {
            return;
        }
        let edge: Vec<Rgba<f32>> = {
            let image = south_map.image();
            (0..width).map(|col| *image.get_pixel(col, 0)).collect()
        };
        let mut image = this_map.image_mut();
        for (col, texel) in edge.into_iter().enumerate() {
            image.put_pixel(col as u32, height - 1, texel);
        }
        trace!(key = %self.key, "stitched normal map edges");
    }

    /// Centre of the bounding sphere, or the extent centre for an empty tile.
    #[must_use]
    pub fn center(&self) -> DVec3 {
        match &self.surface {
            Some(surface) => surface.bounding_sphere().0,
            None => {
                let (x, y) = self.key.extent().center();
                DVec3::new(x, y, 0.0)
            }
        }
    }
}
