//! Per-traversal culling state: frame stamp, viewpoint, frustum and horizon
//! tests, pixel-size estimation and the list of accepted surfaces.

use glam::{DMat4, DVec3, DVec4, Vec4};

use crate::render_model::RenderModel;
use crate::surface::BoundingBox;
use crate::tile_key::TileKey;

/// Frame number and reference time of the traversal in progress.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStamp {
    pub frame_number: u64,
    /// Seconds since an arbitrary epoch.
    pub reference_time: f64,
}

impl FrameStamp {
    #[must_use]
    pub fn new(frame_number: u64, reference_time: f64) -> Self {
        Self {
            frame_number,
            reference_time,
        }
    }
}

/// How the traversing camera relates to the primary view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraKind {
    /// Drives subdivision and loading.
    #[default]
    Primary,
    /// Reuses the primary view's tiles (shadow or reflection cameras). Never
    /// creates tiles and never requests data.
    InheritViewpoint,
}

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A view frustum defined by six inward-pointing planes.
#[derive(Clone, Debug)]
pub struct Frustum {
    planes: [DVec4; 6],
}

impl Frustum {
    /// Extract the planes from a view-projection matrix (Griggs-Hartmann,
    /// OpenGL clip depth in `[-w, w]`).
    #[must_use]
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];
        let mut planes = [DVec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[3] + rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }
        Self { planes }
    }

    /// True if the box is at least partially inside. Conservative near the
    /// frustum corners.
    #[must_use]
    pub fn is_visible(&self, bbox: &BoundingBox) -> bool {
        self.planes.iter().all(|plane| {
            let n = plane.truncate();
            let p = DVec3::new(
                if n.x >= 0.0 { bbox.max.x } else { bbox.min.x },
                if n.y >= 0.0 { bbox.max.y } else { bbox.min.y },
                if n.z >= 0.0 { bbox.max.z } else { bbox.min.z },
            );
            n.dot(p) + plane.w >= 0.0
        })
    }
}

/// Horizon test for a planar map wrapped around a body of the given radius.
///
/// A surface point at height `z` and ground distance `s` from the eye is
/// visible while `s` is within the sum of both tangent distances.
#[derive(Clone, Debug)]
pub struct HorizonCuller {
    eye: DVec3,
    radius: f64,
    eye_horizon: f64,
}

impl HorizonCuller {
    #[must_use]
    pub fn new(eye: DVec3, body_radius: f64) -> Self {
        Self {
            eye,
            radius: body_radius,
            eye_horizon: Self::tangent_distance(body_radius, eye.z),
        }
    }

    fn tangent_distance(radius: f64, height: f64) -> f64 {
        let r = radius + height.max(0.0);
        (r * r - radius * radius).max(0.0).sqrt()
    }

    /// Distance from the eye to its horizon.
    #[must_use]
    pub fn horizon_distance(&self) -> f64 {
        self.eye_horizon
    }

    /// True if any part of the box may rise above the eye's horizon.
    #[must_use]
    pub fn is_visible(&self, bbox: &BoundingBox) -> bool {
        let center = bbox.center();
        let half_diag = 0.5 * bbox.width().hypot(bbox.height());
        let ground = (center.x - self.eye.x).hypot(center.y - self.eye.y) - half_diag;
        if ground <= 0.0 {
            return true;
        }
        ground <= self.eye_horizon + Self::tangent_distance(self.radius, bbox.max.z)
    }
}

/// One accepted surface, as handed to the drawing backend.
#[derive(Clone, Debug)]
pub struct DrawTile {
    pub key: TileKey,
    /// `(x mod 2^16, flipped y mod 2^16, lod, bound size)`.
    pub tile_key_value: Vec4,
    pub morph_constants: (f32, f32),
    pub render_model: RenderModel,
}

/// Host override for the projected size of a tile, in pixels. A non-positive
/// result falls back to the geometric estimate.
pub trait ComputeRangeCallback: Send + Sync {
    fn compute_range(&self, key: &TileKey, bound: &BoundingBox, culler: &TerrainCuller) -> f64;
}

/// State for one cull traversal.
#[derive(Clone, Debug)]
pub struct TerrainCuller {
    frame: FrameStamp,
    eye: DVec3,
    camera: CameraKind,
    lod_scale: f64,
    viewport_height: f64,
    vertical_fov: f64,
    frustum: Option<Frustum>,
    horizon: Option<HorizonCuller>,
    stealth: bool,
    draws: Vec<DrawTile>,
}

impl TerrainCuller {
    /// A primary-camera culler with a 1080-pixel viewport and a 60° field of
    /// view, and no frustum or horizon test.
    #[must_use]
    pub fn new(frame: FrameStamp, eye: DVec3) -> Self {
        Self {
            frame,
            eye,
            camera: CameraKind::Primary,
            lod_scale: 1.0,
            viewport_height: 1080.0,
            vertical_fov: 60f64.to_radians(),
            frustum: None,
            horizon: None,
            stealth: false,
            draws: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_camera(mut self, camera: CameraKind) -> Self {
        self.camera = camera;
        self
    }

    #[must_use]
    pub fn with_lod_scale(mut self, lod_scale: f64) -> Self {
        self.lod_scale = lod_scale;
        self
    }

    /// Viewport height in pixels and vertical field of view in radians.
    #[must_use]
    pub fn with_viewport(mut self, height: f64, vertical_fov: f64) -> Self {
        self.viewport_height = height;
        self.vertical_fov = vertical_fov;
        self
    }

    #[must_use]
    pub fn with_frustum(mut self, frustum: Frustum) -> Self {
        self.frustum = Some(frustum);
        self
    }

    #[must_use]
    pub fn with_horizon(mut self, horizon: HorizonCuller) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Replay previous decisions without evaluating LOD or loading.
    #[must_use]
    pub fn with_stealth(mut self, stealth: bool) -> Self {
        self.stealth = stealth;
        self
    }

    #[must_use]
    pub fn frame_stamp(&self) -> FrameStamp {
        self.frame
    }

    #[must_use]
    pub fn view_point(&self) -> DVec3 {
        self.eye
    }

    #[must_use]
    pub fn camera(&self) -> CameraKind {
        self.camera
    }

    #[must_use]
    pub fn lod_scale(&self) -> f64 {
        self.lod_scale
    }

    #[must_use]
    pub fn is_stealth(&self) -> bool {
        self.stealth
    }

    /// Eye-to-point distance, optionally multiplied by the LOD scale.
    #[must_use]
    pub fn distance_to_view_point(&self, point: DVec3, use_lod_scale: bool) -> f64 {
        let d = point.distance(self.eye);
        if use_lod_scale { d * self.lod_scale } else { d }
    }

    /// Projected diameter of the box's bounding sphere in pixels. Never
    /// negative; a box around the eye reports a very large size.
    #[must_use]
    pub fn clamped_pixel_size(&self, bound: &BoundingBox) -> f64 {
        let pixels_per_unit = self.viewport_height / (2.0 * (self.vertical_fov * 0.5).tan());
        let distance = self
            .distance_to_view_point(bound.center(), true)
            .max(f64::EPSILON);
        (2.0 * bound.radius() * pixels_per_unit / distance).abs()
    }

    /// True if the frustum rejects the box.
    #[must_use]
    pub fn is_culled(&self, bound: &BoundingBox) -> bool {
        self.frustum.as_ref().is_some_and(|f| !f.is_visible(bound))
    }

    /// True if the box may be above the horizon.
    #[must_use]
    pub fn is_above_horizon(&self, bound: &BoundingBox) -> bool {
        self.horizon.as_ref().is_none_or(|h| h.is_visible(bound))
    }

    pub fn push_draw(&mut self, draw: DrawTile) {
        self.draws.push(draw);
    }

    #[must_use]
    pub fn draws(&self) -> &[DrawTile] {
        &self.draws
    }

    /// Take the accepted surfaces, leaving the list empty.
    pub fn take_draws(&mut self) -> Vec<DrawTile> {
        std::mem::take(&mut self.draws)
    }
}
