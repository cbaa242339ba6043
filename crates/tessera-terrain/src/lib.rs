//! View-dependent quadtree tile cache for streamed multi-resolution terrain.
//!
//! Each frame a [`TerrainCuller`] walks the tree from the root tiles. Every
//! [`TileNode`] decides whether its children are in range, creates all four
//! on first need, draws its own surface otherwise, and submits its
//! [`LoadRequest`] to the [`Loader`] when its data is stale. Loads run on a
//! worker pool and are merged back on the owning thread by
//! [`TerrainEngine::update`], which then pushes new data down to inheriting
//! descendants and evicts dormant subtrees.

mod context;
mod culler;
mod engine;
mod geometry;
mod layer;
mod live_tiles;
mod loader;
mod render_model;
mod selection_info;
mod surface;
mod tile_key;
mod tile_node;

#[cfg(test)]
mod scenario_tests;

pub use context::{EngineContext, TileNotifier};
pub use culler::{
    CameraKind, ComputeRangeCallback, DrawTile, FrameStamp, Frustum, HorizonCuller, TerrainCuller,
};
pub use engine::{EngineError, TerrainEngine, UpdateStats};
pub use geometry::{GeometryPool, MaskGenerator, PlanarGeometryPool, RectMaskGenerator, SharedGeometry};
pub use layer::{
    CancelToken, LayerFilter, LayerModel, LayerUid, TerrainTileModel, TileModelSource,
};
pub use live_tiles::LiveTiles;
pub use loader::{
    LoadRequest, Loader, LoaderError, PagerLoader, RequestQueue, RequestState, load_priority,
};
pub use render_model::{
    RenderBindings, RenderModel, RenderingPass, Sampler, SamplerBinding, SamplerSlot, Samplers,
    Texture, TextureHandle, scale_bias,
};
pub use selection_info::{SelectionInfo, VisParameters};
pub use surface::{BoundingBox, ModifyBoundingBox, SurfaceNode};
pub use tile_key::{Extent, Profile, TileKey};
pub use tile_node::{MIN_EXPIRY_FRAMES_FLOOR, TileNode};
