//! Cross-module behaviour of the tile cache: subdivision, loading,
//! inheritance, stitching and eviction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::{DVec3, Mat4};
use image::{Rgba, Rgba32FImage};
use tessera_config::{Config, ConfigError, LoaderOptions, RangeMode, TerrainOptions};

use crate::context::{EngineContext, TileNotifier};
use crate::culler::{CameraKind, ComputeRangeCallback, FrameStamp, TerrainCuller};
use crate::engine::{EngineError, TerrainEngine};
use crate::geometry::{PlanarGeometryPool, RectMaskGenerator};
use crate::layer::{CancelToken, LayerFilter, LayerModel, LayerUid, TerrainTileModel, TileModelSource};
use crate::loader::{LoadRequest, Loader, load_priority};
use crate::render_model::{Sampler, SamplerSlot, Texture, TextureHandle, scale_bias};
use crate::surface::BoundingBox;
use crate::tile_key::{Extent, Profile, TileKey};
use crate::tile_node::TileNode;

const IMAGERY: LayerUid = LayerUid(1);

fn profile() -> Profile {
    Profile::plane(1, 1, 10_000, 10_000)
}

fn root_key() -> TileKey {
    TileKey::new(0, 0, 0, profile())
}

fn options() -> TerrainOptions {
    TerrainOptions {
        tile_size: 5,
        max_lod: 1,
        ..TerrainOptions::default()
    }
}

fn solid(size: u32, value: f32) -> TextureHandle {
    Texture::new(Rgba32FImage::from_pixel(size, size, Rgba([value, value, value, 1.0])))
}

fn image_layer(uid: LayerUid, texture: &TextureHandle) -> LayerModel {
    LayerModel::Image {
        uid,
        texture: texture.clone(),
        matrix: Mat4::IDENTITY,
    }
}

/// Imagery plus a flat elevation raster for every tile.
struct TestSource;

impl TileModelSource for TestSource {
    fn create_tile_model(
        &self,
        key: &TileKey,
        _filter: &LayerFilter,
        _cancel: &CancelToken,
    ) -> Option<TerrainTileModel> {
        Some(
            TerrainTileModel::new(*key)
                .with(image_layer(IMAGERY, &solid(4, 0.5)))
                .with(LayerModel::Elevation {
                    texture: solid(4, key.lod as f32 * 10.0),
                }),
        )
    }
}

struct FailingSource;

impl TileModelSource for FailingSource {
    fn create_tile_model(
        &self,
        _key: &TileKey,
        _filter: &LayerFilter,
        _cancel: &CancelToken,
    ) -> Option<TerrainTileModel> {
        None
    }
}

/// Records submissions instead of running them.
#[derive(Default)]
struct RecordingLoader {
    loads: Mutex<Vec<(TileKey, f32)>>,
}

impl RecordingLoader {
    fn loaded_keys(&self) -> Vec<TileKey> {
        self.loads.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }

    fn priority_of(&self, key: &TileKey) -> Option<f32> {
        self.loads
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, p)| *p)
    }
}

impl Loader for RecordingLoader {
    fn load(&self, request: &Arc<LoadRequest>, priority: f32, _frame: u64) -> bool {
        self.loads.lock().unwrap().push((*request.key(), priority));
        true
    }

    fn cancel(&self, _request: &LoadRequest) {}

    fn dispatch(&self, _frame: u64) -> usize {
        0
    }

    fn drain_results(&self) -> Vec<Arc<LoadRequest>> {
        Vec::new()
    }

    fn queued(&self) -> usize {
        0
    }

    fn in_flight(&self) -> u64 {
        0
    }
}

#[derive(Default)]
struct CountingNotifier(AtomicUsize);

impl TileNotifier for CountingNotifier {
    fn on_tile_added(&self, _key: &TileKey) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn context_with(options: TerrainOptions, source: Arc<dyn TileModelSource>) -> (EngineContext, Arc<RecordingLoader>) {
    let loader = Arc::new(RecordingLoader::default());
    let ctx = EngineContext::new(
        options,
        profile(),
        source,
        loader.clone(),
        Arc::new(PlanarGeometryPool::new()),
    );
    (ctx, loader)
}

fn context() -> (EngineContext, Arc<RecordingLoader>) {
    context_with(options(), Arc::new(TestSource))
}

fn stamp(frame: u64) -> FrameStamp {
    FrameStamp::new(frame, frame as f64)
}

/// Low over the south-east quadrant: the root wants its children.
fn near_culler(frame: u64) -> TerrainCuller {
    TerrainCuller::new(stamp(frame), DVec3::new(2500.0, -2500.0, 50.0))
}

/// High above the map: nothing subdivides.
fn far_culler(frame: u64) -> TerrainCuller {
    TerrainCuller::new(stamp(frame), DVec3::new(0.0, 0.0, 1.0e7))
}

fn color_of(tile: &TileNode, uid: LayerUid) -> Sampler {
    tile.render_model().pass(uid).unwrap().samplers[SamplerSlot::Color].clone()
}

fn color_parent_of(tile: &TileNode, uid: LayerUid) -> Sampler {
    tile.render_model().pass(uid).unwrap().samplers[SamplerSlot::ColorParent].clone()
}

fn sampler(texture: &TextureHandle, matrix: Mat4) -> Sampler {
    Sampler {
        texture: Some(texture.clone()),
        matrix,
    }
}

/// The four child keys are distinct and each maps back to its parent and quadrant.
#[test]
fn test_quadrant_partition_holds_across_levels() {
    let key = TileKey::new(6, 33, 12, Profile::global_geodetic());
    let children: Vec<TileKey> = (0..4).map(|q| key.child_key(q)).collect();
    for (q, child) in children.iter().enumerate() {
        assert_eq!(child.parent(), Some(key));
        assert_eq!(child.quadrant(), q as u32);
        assert_eq!(children.iter().filter(|c| *c == child).count(), 1);
    }
}

/// A tile has either zero or four children, never a partial set.
#[test]
fn test_children_are_all_or_nothing() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    assert_eq!(root.num_children(), 0);

    root.accept(&mut far_culler(1), &ctx);
    assert_eq!(root.num_children(), 0);

    root.accept(&mut near_culler(2), &ctx);
    assert_eq!(root.num_children(), 4);
    assert!(root.children_ready());

    root.accept(&mut near_culler(3), &ctx);
    assert_eq!(root.num_children(), 4);

    root.remove_sub_tiles(&ctx);
    assert_eq!(root.num_children(), 0);
    assert!(!root.children_ready());
}

/// A tile that subdivides loads its children first and itself on the next frame.
#[test]
fn test_subdivision_defers_own_load_for_one_frame() {
    let (ctx, loader) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    assert!(root.is_dirty());

    let mut culler = near_culler(1);
    root.accept(&mut culler, &ctx);
    assert_eq!(root.num_children(), 4);
    let loaded = loader.loaded_keys();
    assert!(!loaded.contains(&root_key()), "root must not load on the frame it subdivides");
    assert_eq!(loaded.len(), 4);
    assert_eq!(culler.draws().len(), 4);

    root.accept(&mut near_culler(2), &ctx);
    assert!(loader.loaded_keys().contains(&root_key()));
}

/// A tile too small on screen to split should draw itself and request its data.
#[test]
fn test_far_tile_draws_itself_and_loads() {
    let (ctx, loader) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    let mut culler = far_culler(1);
    assert!(root.accept(&mut culler, &ctx));
    assert_eq!(culler.draws().len(), 1);
    assert_eq!(culler.draws()[0].key, root_key());
    assert_eq!(root.last_accept_surface_frame(), Some(1));
    assert_eq!(loader.loaded_keys(), vec![root_key()]);
}

/// A child fully covered by a mask should be empty: unregistered, unloaded and undrawn.
#[test]
fn test_empty_tile_never_loads_or_draws() {
    let (ctx, loader) = context();
    // fully covers the north-west child
    let masks = RectMaskGenerator::new(vec![Extent::new(-6000.0, -1.0, 1.0, 6000.0)]);
    let ctx = ctx.with_masks(Arc::new(masks));
    let root = TileNode::create(root_key(), None, &ctx);
    assert!(!root.is_empty());

    let mut culler = near_culler(1);
    root.accept(&mut culler, &ctx);
    assert_eq!(root.num_children(), 4);

    let nw = root.sub_tile(0).unwrap();
    assert!(nw.is_empty());
    assert!(nw.load_request().is_none());
    assert!(!ctx.live_tiles.contains(nw.key()));
    assert!(culler.draws().iter().all(|d| d.key != *nw.key()));
    assert_eq!(culler.draws().len(), 3);
    assert!(!loader.loaded_keys().contains(nw.key()));

    let mut again = near_culler(2);
    assert!(!nw.accept(&mut again, &ctx));
    assert!(again.draws().is_empty());
}

/// Closer tiles should be queued ahead of farther ones at the same LOD.
#[test]
fn test_priority_prefers_closer_tile() {
    let near = load_priority(4, 10, true, 10.0, 2000.0);
    let far = load_priority(4, 10, true, 1000.0, 2000.0);
    assert!(near > far);

    let (ctx, loader) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    let mut culler = TerrainCuller::new(stamp(1), DVec3::new(2500.0, -2500.0, 10.0));
    root.accept(&mut culler, &ctx);
    let se = loader.priority_of(&root_key().child_key(3)).unwrap();
    let nw = loader.priority_of(&root_key().child_key(0)).unwrap();
    assert!(se > nw, "se ({se}) should outrank nw ({nw})");
}

/// Shadow-style cameras draw what exists without subdividing or loading.
#[test]
fn test_inherit_viewpoint_camera_never_streams() {
    let (ctx, loader) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    let mut culler = near_culler(1).with_camera(CameraKind::InheritViewpoint);
    root.accept(&mut culler, &ctx);
    assert_eq!(root.num_children(), 0);
    assert!(loader.loaded_keys().is_empty());
    assert_eq!(culler.draws().len(), 1);
}

/// In progressive mode a dirty tile does not split until its own data merges.
#[test]
fn test_progressive_mode_waits_for_own_data() {
    let options = TerrainOptions {
        progressive: true,
        ..options()
    };
    let (ctx, loader) = context_with(options, Arc::new(TestSource));
    let root = TileNode::create(root_key(), None, &ctx);

    root.accept(&mut near_culler(1), &ctx);
    assert_eq!(root.num_children(), 0);
    assert_eq!(loader.loaded_keys(), vec![root_key()]);

    root.load_sync(&ctx);
    assert!(!root.is_dirty());
    root.accept(&mut near_culler(2), &ctx);
    assert_eq!(root.num_children(), 4);
}

/// Stealth traversal replays only tiles accepted on the last frame.
#[test]
fn test_stealth_replays_without_loading() {
    let (ctx, loader) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    root.accept(&mut far_culler(5), &ctx);
    assert_eq!(loader.loaded_keys().len(), 1);

    let mut replay = far_culler(6).with_stealth(true);
    root.accept(&mut replay, &ctx);
    assert_eq!(replay.draws().len(), 1);

    let mut stale = far_culler(9).with_stealth(true);
    root.accept(&mut stale, &ctx);
    assert!(stale.draws().is_empty());
    assert_eq!(loader.loaded_keys().len(), 1);
    assert_eq!(root.last_traversal_frame(), 5);
}

/// Distance mode splits when a child box falls inside the next LOD's range.
#[test]
fn test_distance_mode_tests_child_boxes() {
    let options = TerrainOptions {
        range_mode: RangeMode::Distance,
        ..options()
    };
    let (ctx, _) = context_with(options, Arc::new(TestSource));
    let root = TileNode::create(root_key(), None, &ctx);
    let close = TerrainCuller::new(stamp(1), DVec3::new(0.0, 0.0, 1000.0));
    assert!(root.should_subdivide(&close, &ctx));
    let distant = TerrainCuller::new(stamp(1), DVec3::new(0.0, 0.0, 1.0e6));
    assert!(!root.should_subdivide(&distant, &ctx));

    let child = TileNode::create(root_key().child_key(0), Some(&*root), &ctx);
    assert!(!child.should_subdivide(&close, &ctx), "finest level never subdivides");
}

struct FixedRange(f64);

impl ComputeRangeCallback for FixedRange {
    fn compute_range(&self, _key: &TileKey, _bound: &BoundingBox, _culler: &TerrainCuller) -> f64 {
        self.0
    }
}

/// A range callback result wins over pixel size; a negative result defers to it.
#[test]
fn test_compute_range_callback_overrides_pixel_size() {
    let (ctx, _) = context();
    let ctx = ctx.with_compute_range(Arc::new(FixedRange(1.0e9)));
    let root = TileNode::create(root_key(), None, &ctx);
    assert!(root.should_subdivide(&far_culler(1), &ctx));

    let (ctx, _) = context();
    let ctx = ctx.with_compute_range(Arc::new(FixedRange(-1.0)));
    let root = TileNode::create(root_key(), None, &ctx);
    assert!(!root.should_subdivide(&far_culler(1), &ctx));
    assert!(root.should_subdivide(&near_culler(1), &ctx));
}

/// New children inherit every parent sampler with their quadrant's scale-bias applied.
#[test]
fn test_children_inherit_scale_biased_parent_data() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    root.load_sync(&ctx);
    let root_color = color_of(&root, IMAGERY);
    let root_elevation = root.elevation_raster().unwrap();

    root.accept(&mut near_culler(1), &ctx);
    for (q, child) in root.children().iter().enumerate() {
        let expected = sampler(root_color.texture.as_ref().unwrap(), scale_bias(q as u32));
        assert_eq!(color_of(child, IMAGERY), expected);
        assert_eq!(color_parent_of(child, IMAGERY), expected);
        assert!(Arc::ptr_eq(&child.elevation_raster().unwrap(), &root_elevation));
        assert_eq!(child.elevation_matrix(), scale_bias(q as u32));
        assert!(child.is_dirty());
    }
}

/// A second inheritance refresh with no upstream change should report zero changes.
#[test]
fn test_inheritance_refresh_reaches_fixed_point() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    root.load_sync(&ctx);
    root.accept(&mut near_culler(1), &ctx);

    for child in root.children() {
        assert_eq!(child.refresh_inherited_data(&root, &ctx.bindings), 0);
    }

    // A new pass on the parent is pushed down during merge.
    let roads = LayerUid(2);
    let texture = solid(4, 0.2);
    root.merge(&TerrainTileModel::new(root_key()).with(image_layer(roads, &texture)), &ctx);
    for (q, child) in root.children().iter().enumerate() {
        assert_eq!(color_of(child, roads), sampler(&texture, scale_bias(q as u32)));
        assert_eq!(child.refresh_inherited_data(&root, &ctx.bindings), 0);
        assert_eq!(child.refresh_inherited_data(&root, &ctx.bindings), 0);
    }
}

/// A child's own texture should not be overwritten by newer parent data.
#[test]
fn test_owned_samplers_survive_parent_updates() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    root.load_sync(&ctx);
    root.accept(&mut near_culler(1), &ctx);
    let child = root.sub_tile(0).unwrap();

    let own = solid(4, 0.9);
    child.merge(&TerrainTileModel::new(*child.key()).with(image_layer(IMAGERY, &own)), &ctx);

    let newer = solid(4, 0.1);
    root.merge(&TerrainTileModel::new(root_key()).with(image_layer(IMAGERY, &newer)), &ctx);

    assert_eq!(color_of(&child, IMAGERY), Sampler::owned(own));
    assert_eq!(color_parent_of(&child, IMAGERY), sampler(&newer, scale_bias(0)));
    let sibling = root.sub_tile(1).unwrap();
    assert_eq!(color_of(&sibling, IMAGERY), sampler(&newer, scale_bias(1)));
}

/// Color-parent follows the child's own color until the parent gains the layer.
#[test]
fn test_color_parent_moves_from_own_color_to_parent_color() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    root.load_sync(&ctx);
    root.accept(&mut near_culler(1), &ctx);
    let child = root.sub_tile(0).unwrap();

    // The layer first shows up at the child's level.
    let hillshade = LayerUid(3);
    let own = solid(4, 0.3);
    child.merge(&TerrainTileModel::new(*child.key()).with(image_layer(hillshade, &own)), &ctx);
    assert_eq!(color_parent_of(&child, hillshade), Sampler::owned(own.clone()));
    assert_eq!(child.refresh_inherited_data(&root, &ctx.bindings), 0);

    // Once the parent has it, color-parent tracks the parent's color.
    let coarse = solid(4, 0.6);
    root.merge(&TerrainTileModel::new(root_key()).with(image_layer(hillshade, &coarse)), &ctx);
    assert_eq!(color_of(&child, hillshade), Sampler::owned(own));
    assert_eq!(color_parent_of(&child, hillshade), sampler(&coarse, scale_bias(0)));
}

/// Without a parent texture, color-parent falls back to the child's own color.
#[test]
fn test_color_parent_falls_back_to_own_color_without_parent_texture() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    root.load_sync(&ctx);
    let splat = LayerUid(4);
    root.merge(&TerrainTileModel::new(root_key()).with(LayerModel::Color { uid: splat }), &ctx);
    root.accept(&mut near_culler(1), &ctx);
    let child = root.sub_tile(2).unwrap();
    assert!(color_of(&child, splat).texture.is_none());

    let own = solid(4, 0.4);
    child.merge(&TerrainTileModel::new(*child.key()).with(image_layer(splat, &own)), &ctx);
    assert!(child.refresh_inherited_data(&root, &ctx.bindings) > 0);
    assert_eq!(color_parent_of(&child, splat), Sampler::owned(own));
    assert_eq!(child.refresh_inherited_data(&root, &ctx.bindings), 0);
}

/// A tile is dormant only once both the frame and the time thresholds pass.
#[test]
fn test_dormancy_needs_both_thresholds() {
    let options = TerrainOptions {
        min_expiry_frames: Some(5),
        min_expiry_time: Some(1.0),
        ..options()
    };
    let (ctx, _) = context_with(options, Arc::new(TestSource));
    let tile = TileNode::create(root_key(), None, &ctx);
    let mut culler = TerrainCuller::new(FrameStamp::new(10, 1.0), DVec3::new(0.0, 0.0, 1.0e7));
    tile.accept(&mut culler, &ctx);

    assert!(!tile.is_dormant(FrameStamp::new(10, 1.0)));
    assert!(!tile.is_dormant(FrameStamp::new(16, 1.5)), "time threshold not met");
    assert!(!tile.is_dormant(FrameStamp::new(15, 5.0)), "frame threshold not met");
    assert!(tile.is_dormant(FrameStamp::new(16, 2.5)));

    let mut again = TerrainCuller::new(FrameStamp::new(16, 2.5), DVec3::new(0.0, 0.0, 1.0e7));
    tile.accept(&mut again, &ctx);
    assert!(!tile.is_dormant(FrameStamp::new(16, 2.5)));
}

/// Dormancy never triggers sooner than the three-frame floor.
#[test]
fn test_dormancy_frame_floor() {
    let (ctx, _) = context();
    let tile = TileNode::create(root_key(), None, &ctx);
    tile.accept(&mut far_culler(10), &ctx);
    assert!(!tile.is_dormant(FrameStamp::new(13, 100.0)));
    assert!(tile.is_dormant(FrameStamp::new(14, 100.0)));
}

/// Evicted children are dropped and later recreated from the parent's current data.
#[test]
fn test_eviction_resets_and_recreates_from_current_parent() {
    let (ctx, _) = context();
    let engine = TerrainEngine::from_context(ctx).unwrap();
    let root = engine.roots()[0].clone();
    assert!(!root.is_dirty());

    engine.cull(&mut near_culler(1));
    let old_children = root.children();
    assert_eq!(old_children.len(), 4);
    assert_eq!(engine.update(stamp(1)).evicted, 0);
    assert_eq!(engine.live_tile_count(), 5);

    // partially dormant subtrees are kept
    assert!(!root.are_sub_tiles_dormant(stamp(3)));

    let stats = engine.update(stamp(10));
    assert_eq!(stats.evicted, 1);
    assert!(!root.children_ready());
    assert_eq!(root.num_children(), 0);
    assert_eq!(engine.live_tile_count(), 1);
    assert!(engine.tile(old_children[0].key()).is_none());

    let roads = LayerUid(2);
    let texture = solid(4, 0.8);
    root.merge(&TerrainTileModel::new(root_key()).with(image_layer(roads, &texture)), engine.context());

    engine.cull(&mut near_culler(11));
    let new_children = root.children();
    assert_eq!(new_children.len(), 4);
    for (q, (old, new)) in old_children.iter().zip(&new_children).enumerate() {
        assert!(!Arc::ptr_eq(old, new));
        assert!(new.is_dirty());
        assert_eq!(color_of(new, roads), sampler(&texture, scale_bias(q as u32)));
    }
}

/// Engine construction should fail for a zero-vertex tile mesh.
#[test]
fn test_engine_rejects_degenerate_tile_size() {
    let options = TerrainOptions {
        tile_size: 0,
        ..options()
    };
    let (ctx, _) = context_with(options, Arc::new(TestSource));
    assert!(matches!(
        TerrainEngine::from_context(ctx),
        Err(EngineError::Options(ConfigError::InvalidTileSize(0)))
    ));
}

/// Engine construction should fail when first_lod is past max_lod.
#[test]
fn test_engine_rejects_inverted_lod_range() {
    let config = Config {
        terrain: TerrainOptions {
            first_lod: 2,
            ..options()
        },
        ..Config::default()
    };
    let result = TerrainEngine::new(
        &config,
        profile(),
        Arc::new(TestSource),
        Arc::new(PlanarGeometryPool::new()),
        None,
    );
    assert!(matches!(
        result,
        Err(EngineError::Options(ConfigError::InvalidLodRange { first_lod: 2, max_lod: 1 }))
    ));
}

/// A profile whose tile count overflows at max_lod should be refused.
#[test]
fn test_engine_rejects_profile_too_wide_for_max_lod() {
    let options = TerrainOptions {
        max_lod: TileKey::MAX_LOD,
        ..options()
    };
    let ctx = EngineContext::new(
        options,
        Profile::plane(5, 1, 10_000, 2_000),
        Arc::new(TestSource),
        Arc::new(RecordingLoader::default()),
        Arc::new(PlanarGeometryPool::new()),
    );
    assert!(matches!(
        TerrainEngine::from_context(ctx),
        Err(EngineError::TooManyTiles(30))
    ));
}

/// A zero unload budget keeps every subtree resident.
#[test]
fn test_sweep_respects_unload_budget() {
    let options = TerrainOptions {
        max_unloads_per_frame: Some(0),
        ..options()
    };
    let (ctx, _) = context_with(options, Arc::new(TestSource));
    let engine = TerrainEngine::from_context(ctx).unwrap();
    engine.cull(&mut near_culler(1));
    assert_eq!(engine.update(stamp(50)).evicted, 0);
    assert_eq!(engine.roots()[0].num_children(), 4);
}

/// A load that produces no model leaves the tile dirty and its render model untouched.
#[test]
fn test_failed_load_keeps_tile_dirty() {
    let (ctx, _) = context_with(options(), Arc::new(FailingSource));
    let root = TileNode::create(root_key(), None, &ctx);
    root.load_sync(&ctx);
    assert!(root.is_dirty());
    assert!(root.render_model().passes.is_empty());
}

/// Layer refreshes queued while loading re-arm the dirty flag on the next clear.
#[test]
fn test_queued_layers_rearm_dirty_flag() {
    let (ctx, _) = context();
    let root = TileNode::create(root_key(), None, &ctx);
    let narrow = LayerFilter::only([LayerUid(7)]);

    root.refresh_layers(narrow.clone());
    root.set_dirty(false);
    assert!(root.is_dirty());
    assert_eq!(root.load_request().unwrap().filter(), narrow);
    root.set_dirty(false);
    assert!(!root.is_dirty());

    root.refresh_layers(narrow.clone());
    assert!(root.is_dirty());
    assert_eq!(root.load_request().unwrap().filter(), narrow);
}

fn normals(key: &TileKey, size: u32, value: f32) -> TerrainTileModel {
    TerrainTileModel::new(*key).with(LayerModel::Normal {
        texture: solid(size, value),
    })
}

fn stitch_context() -> EngineContext {
    let options = TerrainOptions {
        normalize_edges: true,
        ..options()
    };
    EngineContext::new(
        options,
        Profile::plane(2, 2, 2000, 2000),
        Arc::new(TestSource),
        Arc::new(RecordingLoader::default()),
        Arc::new(PlanarGeometryPool::new()),
    )
}

fn normal_texel(tile: &TileNode, x: u32, y: u32) -> f32 {
    let rm = tile.render_model();
    let texture = rm.shared_samplers[SamplerSlot::Normal].texture.clone().unwrap();
    texture.image().get_pixel(x, y).0[0]
}

/// East and south neighbours link up on creation without keeping each other alive.
#[test]
fn test_neighbors_are_wired_on_arrival() {
    let ctx = stitch_context();
    let p = ctx.profile;
    let a = TileNode::create(TileKey::new(0, 0, 0, p), None, &ctx);
    let b = TileNode::create(TileKey::new(0, 1, 0, p), None, &ctx);
    let c = TileNode::create(TileKey::new(0, 0, 1, p), None, &ctx);
    assert!(Arc::ptr_eq(&a.east_neighbor().unwrap(), &b));
    assert!(Arc::ptr_eq(&a.south_neighbor().unwrap(), &c));
    drop(b);
    assert!(a.east_neighbor().is_none(), "neighbour links must not keep tiles alive");
    assert_eq!(ctx.live_tiles.purge_dead(), 1);
}

/// Edge normals are copied from the east and south neighbours.
#[test]
fn test_seam_stitch_copies_neighbor_edges() {
    let ctx = stitch_context();
    let p = ctx.profile;
    let a = TileNode::create(TileKey::new(0, 0, 0, p), None, &ctx);
    let b = TileNode::create(TileKey::new(0, 1, 0, p), None, &ctx);
    let c = TileNode::create(TileKey::new(0, 0, 1, p), None, &ctx);

    b.merge(&normals(b.key(), 4, 0.9), &ctx);
    c.merge(&normals(c.key(), 4, 0.7), &ctx);
    a.merge(&normals(a.key(), 4, 0.1), &ctx);

    for i in 0..3 {
        assert_eq!(normal_texel(&a, 3, i), 0.9, "east column row {i}");
        assert_eq!(normal_texel(&a, 0, i), 0.1);
    }
    for i in 0..4 {
        assert_eq!(normal_texel(&a, i, 3), 0.7, "south row col {i}");
    }
    assert_eq!(normal_texel(&b, 0, 0), 0.9);
}

/// Normal maps of different sizes are never stitched.
#[test]
fn test_seam_stitch_skips_mismatched_sizes() {
    let ctx = stitch_context();
    let p = ctx.profile;
    let a = TileNode::create(TileKey::new(0, 0, 0, p), None, &ctx);
    let b = TileNode::create(TileKey::new(0, 1, 0, p), None, &ctx);
    let c = TileNode::create(TileKey::new(0, 0, 1, p), None, &ctx);

    b.merge(&normals(b.key(), 8, 0.9), &ctx);
    c.merge(&normals(c.key(), 4, 0.7), &ctx);
    a.merge(&normals(a.key(), 4, 0.1), &ctx);

    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(normal_texel(&a, x, y), 0.1);
        }
    }
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(normal_texel(&b, x, y), 0.9);
        }
    }
}

/// The notifier fires on tile creation and on elevation arrival.
#[test]
fn test_notifier_hears_creation_and_elevation() {
    let (ctx, _) = context();
    let notifier = Arc::new(CountingNotifier::default());
    let ctx = ctx.with_notifier(notifier.clone());
    let root = TileNode::create(root_key(), None, &ctx);
    assert_eq!(notifier.0.load(Ordering::Relaxed), 1);
    root.load_sync(&ctx);
    assert_eq!(notifier.0.load(Ordering::Relaxed), 2);
}

/// End to end: children load on the worker pool and merge during update.
#[test]
fn test_engine_streams_children_through_worker_pool() {
    let config = Config {
        terrain: options(),
        loader: LoaderOptions {
            worker_threads: 2,
            ..LoaderOptions::default()
        },
        ..Config::default()
    };
    let engine = TerrainEngine::new(
        &config,
        profile(),
        Arc::new(TestSource),
        Arc::new(PlanarGeometryPool::new()),
        None,
    )
    .unwrap();

    let mut merged = 0;
    for frame in 1..=500 {
        let mut culler = near_culler(frame);
        engine.cull(&mut culler);
        merged += engine.update(stamp(frame)).merged;
        let children = engine.roots()[0].children();
        if children.len() == 4 && children.iter().all(|c| !c.is_dirty()) {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let children = engine.roots()[0].children();
    assert_eq!(children.len(), 4);
    assert!(children.iter().all(|c| !c.is_dirty()));
    assert!(merged >= 4);
    assert_eq!(engine.live_tile_count(), 5);
}
