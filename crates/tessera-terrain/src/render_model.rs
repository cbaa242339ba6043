//! Per-tile sampler table: one rendering pass per data layer plus per-tile shared samplers.
//!
//! A sampler is *owned* when it carries a texture with an identity matrix,
//! i.e. data delivered for this very tile. Anything else (no texture, or a
//! texture reached through a scale-bias matrix) is inherited from an ancestor
//! and may be overwritten when the ancestor's data changes.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::{Mat4, Vec3};
use image::Rgba32FImage;
use tessera_config::TerrainOptions;

use crate::layer::LayerUid;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared, reference-counted texture handle.
pub type TextureHandle = Arc<Texture>;

/// A texture with a CPU-side raster.
///
/// Elevation textures keep heights in the red channel; normal maps keep the
/// normal in RGB.
pub struct Texture {
    id: u64,
    image: RwLock<Rgba32FImage>,
}

impl Texture {
    /// Wrap an image in a new shared texture with a fresh id.
    #[must_use]
    pub fn new(image: Rgba32FImage) -> TextureHandle {
        Arc::new(Self {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            image: RwLock::new(image),
        })
    }

    /// Process-unique texture id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Raster width and height in texels.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image().dimensions()
    }

    /// Read access to the raster.
    pub fn image(&self) -> RwLockReadGuard<'_, Rgba32FImage> {
        self.image.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the raster.
    pub fn image_mut(&self) -> RwLockWriteGuard<'_, Rgba32FImage> {
        self.image.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("size", &(w, h))
            .finish()
    }
}

/// Scale-bias matrix mapping a child's unit texture square into one quadrant
/// of its parent's.
///
/// Quadrants follow [`TileKey::child_key`](crate::TileKey::child_key): 0 = NW,
/// 1 = NE, 2 = SW, 3 = SE, with texture `t` growing northward.
#[must_use]
pub fn scale_bias(quadrant: u32) -> Mat4 {
    let (tx, ty) = match quadrant & 3 {
        0 => (0.0, 0.5),
        1 => (0.5, 0.5),
        2 => (0.0, 0.0),
        _ => (0.5, 0.0),
    };
    Mat4::from_translation(Vec3::new(tx, ty, 0.0)) * Mat4::from_scale(Vec3::new(0.5, 0.5, 1.0))
}

/// A texture binding plus the matrix that maps tile coordinates into it.
#[derive(Clone, Debug)]
pub struct Sampler {
    pub texture: Option<TextureHandle>,
    pub matrix: Mat4,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            texture: None,
            matrix: Mat4::IDENTITY,
        }
    }
}

impl PartialEq for Sampler {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other.texture.as_ref(), &other.matrix)
    }
}

impl Sampler {
    /// A sampler bound directly (identity matrix) to `texture`.
    #[must_use]
    pub fn owned(texture: TextureHandle) -> Self {
        Self {
            texture: Some(texture),
            matrix: Mat4::IDENTITY,
        }
    }

    /// True when this sampler holds this tile's own data.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.texture.is_some() && self.matrix == Mat4::IDENTITY
    }

    /// True when this sampler is empty or reaches an ancestor's data.
    #[must_use]
    pub fn is_inherited(&self) -> bool {
        !self.is_owned()
    }

    /// This sampler seen from the child tile in `quadrant`.
    #[must_use]
    pub fn for_quadrant(&self, quadrant: u32) -> Sampler {
        Sampler {
            texture: self.texture.clone(),
            matrix: self.matrix * scale_bias(quadrant),
        }
    }

    /// True if this sampler binds the same texture through the same matrix.
    #[must_use]
    pub fn same_as(&self, texture: Option<&TextureHandle>, matrix: &Mat4) -> bool {
        let same_texture = match (&self.texture, texture) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_texture && self.matrix == *matrix
    }

    /// Overwrite with `other`, returning whether anything changed.
    pub fn assign(&mut self, other: Sampler) -> bool {
        if *self == other {
            return false;
        }
        *self = other;
        true
    }
}

/// Symbolic sampler slot. Color slots live in each pass; the others are shared per tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplerSlot {
    Color,
    ColorParent,
    Elevation,
    Normal,
    /// Extra shared binding `n` (0-based).
    Shared(usize),
}

impl SamplerSlot {
    /// Index into a [`Samplers`] table.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            SamplerSlot::Color => 0,
            SamplerSlot::ColorParent => 1,
            SamplerSlot::Elevation => 2,
            SamplerSlot::Normal => 3,
            SamplerSlot::Shared(n) => 4 + n,
        }
    }

    /// Inverse of [`Self::index`].
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => SamplerSlot::Color,
            1 => SamplerSlot::ColorParent,
            2 => SamplerSlot::Elevation,
            3 => SamplerSlot::Normal,
            n => SamplerSlot::Shared(n - 4),
        }
    }
}

/// Fixed-size sampler table, one entry per render binding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Samplers(Vec<Sampler>);

impl Samplers {
    /// A table of `len` empty samplers.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self(vec![Sampler::default(); len])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sampler> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Sampler> {
        self.0.iter_mut()
    }

    /// Every sampler transformed into the given child quadrant.
    #[must_use]
    pub fn for_quadrant(&self, quadrant: u32) -> Samplers {
        Samplers(self.0.iter().map(|s| s.for_quadrant(quadrant)).collect())
    }
}

impl Index<SamplerSlot> for Samplers {
    type Output = Sampler;

    fn index(&self, slot: SamplerSlot) -> &Sampler {
        &self.0[slot.index()]
    }
}

impl IndexMut<SamplerSlot> for Samplers {
    fn index_mut(&mut self, slot: SamplerSlot) -> &mut Sampler {
        &mut self.0[slot.index()]
    }
}

/// One entry of the binding table.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerBinding {
    /// Shader sampler name.
    pub sampler_name: String,
    /// Layer feeding this binding (shared bindings only).
    pub source_uid: Option<LayerUid>,
    pub active: bool,
}

impl SamplerBinding {
    fn new(sampler_name: &str, active: bool) -> Self {
        Self {
            sampler_name: sampler_name.to_string(),
            source_uid: None,
            active,
        }
    }
}

/// Binding table shared by every tile of one engine.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderBindings {
    bindings: Vec<SamplerBinding>,
}

impl RenderBindings {
    /// Build the table. Color is always active; every `shared` layer gets its
    /// own active slot after the four fixed ones.
    #[must_use]
    pub fn new(color_parent: bool, elevation: bool, normal: bool, shared: &[LayerUid]) -> Self {
        let mut bindings = vec![
            SamplerBinding::new("tessera_color", true),
            SamplerBinding::new("tessera_color_parent", color_parent),
            SamplerBinding::new("tessera_elevation", elevation),
            SamplerBinding::new("tessera_normal", normal),
        ];
        for (n, uid) in shared.iter().enumerate() {
            let mut binding = SamplerBinding::new(&format!("tessera_shared_{n}"), true);
            binding.source_uid = Some(*uid);
            bindings.push(binding);
        }
        Self { bindings }
    }

    /// Build the table from terrain options.
    #[must_use]
    pub fn from_options(options: &TerrainOptions, shared: &[LayerUid]) -> Self {
        Self::new(options.color_parent_blending, true, options.normal_maps, shared)
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    #[must_use]
    pub fn get(&self, slot: SamplerSlot) -> Option<&SamplerBinding> {
        self.bindings.get(slot.index())
    }

    /// True if the slot exists and is active.
    #[must_use]
    pub fn is_active(&self, slot: SamplerSlot) -> bool {
        self.get(slot).is_some_and(|b| b.active)
    }

    /// The active shared slot fed by `uid`, if any.
    #[must_use]
    pub fn shared_slot_for(&self, uid: LayerUid) -> Option<SamplerSlot> {
        self.bindings
            .iter()
            .enumerate()
            .skip(SamplerSlot::Shared(0).index())
            .find(|(_, b)| b.active && b.source_uid == Some(uid))
            .map(|(i, _)| SamplerSlot::from_index(i))
    }
}

/// The samplers bound for one data layer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderingPass {
    pub source_uid: LayerUid,
    pub samplers: Samplers,
}

/// Everything a tile binds when drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderModel {
    /// Passes in draw order, looked up by layer uid.
    pub passes: Vec<RenderingPass>,
    /// Per-tile samplers (elevation, normal, extra shared layers).
    pub shared_samplers: Samplers,
    slots: usize,
}

impl RenderModel {
    /// An empty model sized for `bindings`.
    #[must_use]
    pub fn new(bindings: &RenderBindings) -> Self {
        Self {
            passes: Vec::new(),
            shared_samplers: Samplers::new(bindings.len()),
            slots: bindings.len(),
        }
    }

    /// Append a new, empty pass for `uid`.
    pub fn add_pass(&mut self, uid: LayerUid) -> &mut RenderingPass {
        self.passes.push(RenderingPass {
            source_uid: uid,
            samplers: Samplers::new(self.slots),
        });
        let last = self.passes.len() - 1;
        &mut self.passes[last]
    }

    /// The pass bound to `uid`.
    #[must_use]
    pub fn pass(&self, uid: LayerUid) -> Option<&RenderingPass> {
        self.passes.iter().find(|p| p.source_uid == uid)
    }

    pub fn pass_mut(&mut self, uid: LayerUid) -> Option<&mut RenderingPass> {
        self.passes.iter_mut().find(|p| p.source_uid == uid)
    }

    /// The pass bound to `uid`, created if missing. The flag reports creation.
    pub fn pass_or_insert(&mut self, uid: LayerUid) -> (&mut RenderingPass, bool) {
        match self.passes.iter().position(|p| p.source_uid == uid) {
            Some(i) => (&mut self.passes[i], false),
            None => (self.add_pass(uid), true),
        }
    }

    /// Replace this model with `parent`'s, seen from the child in `quadrant`.
    ///
    /// Every pass and shared sampler is copied with its matrix scale-biased. With
    /// color-parent blending on, each pass's color-parent starts as its color.
    pub fn inherit_from(&mut self, parent: &RenderModel, quadrant: u32, bindings: &RenderBindings) {
        let blend = bindings.is_active(SamplerSlot::ColorParent);
        self.passes = parent
            .passes
            .iter()
            .map(|pass| {
                let mut samplers = pass.samplers.for_quadrant(quadrant);
                if blend {
                    samplers[SamplerSlot::ColorParent] = samplers[SamplerSlot::Color].clone();
                }
                RenderingPass {
                    source_uid: pass.source_uid,
                    samplers,
                }
            })
            .collect();
        self.shared_samplers = parent.shared_samplers.for_quadrant(quadrant);
        self.slots = parent.slots;
    }

    /// Drop textures from shared samplers whose binding is no longer active.
    pub fn refresh_shared_samplers(&mut self, bindings: &RenderBindings) {
        for (i, sampler) in self.shared_samplers.iter_mut().enumerate() {
            if !bindings.is_active(SamplerSlot::from_index(i)) {
                sampler.texture = None;
            }
        }
    }
}
