//! The drawable stand-in for a tile: footprint, elevation cache and bounds.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use glam::{DVec3, Mat4, Vec4};
use tracing::warn;

use crate::geometry::SharedGeometry;
use crate::render_model::TextureHandle;
use crate::tile_key::TileKey;

/// An axis-aligned box in world space. x/y are projected metres, z is height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl BoundingBox {
    #[must_use]
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the enclosing sphere.
    #[must_use]
    pub fn radius(&self) -> f64 {
        (self.max - self.min).length() * 0.5
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// The eight corners.
    #[must_use]
    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }

    /// The box covering one child quadrant (0 = NW, 1 = NE, 2 = SW, 3 = SE),
    /// keeping this box's height range.
    #[must_use]
    pub fn quadrant(&self, quadrant: u32) -> BoundingBox {
        let mid = self.center();
        let (x0, x1) = if quadrant & 1 == 0 {
            (self.min.x, mid.x)
        } else {
            (mid.x, self.max.x)
        };
        let (y0, y1) = if quadrant >> 1 == 0 {
            (mid.y, self.max.y)
        } else {
            (self.min.y, mid.y)
        };
        BoundingBox::new(
            DVec3::new(x0, y0, self.min.z),
            DVec3::new(x1, y1, self.max.z),
        )
    }
}

/// Host hook that adjusts every freshly computed tile box, e.g. to make room
/// for features draped on the terrain.
pub trait ModifyBoundingBox: Send + Sync {
    fn modify_bounding_box(&self, key: &TileKey, bbox: &mut BoundingBox);
}

#[derive(Clone, Debug)]
struct ElevationRaster {
    texture: Option<TextureHandle>,
    matrix: Mat4,
}

/// Per-tile surface: shared mesh, cached elevation raster and a lazily
/// recomputed bounding box.
pub struct SurfaceNode {
    key: TileKey,
    geometry: Arc<SharedGeometry>,
    elevation: RwLock<ElevationRaster>,
    bound: Mutex<Option<BoundingBox>>,
    modifier: Option<Arc<dyn ModifyBoundingBox>>,
}

impl std::fmt::Debug for SurfaceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceNode")
            .field("key", &self.key)
            .field("vertex_count", &self.geometry.vertex_count)
            .finish_non_exhaustive()
    }
}

impl SurfaceNode {
    #[must_use]
    pub fn new(
        key: TileKey,
        geometry: Arc<SharedGeometry>,
        modifier: Option<Arc<dyn ModifyBoundingBox>>,
    ) -> Self {
        Self {
            key,
            geometry,
            elevation: RwLock::new(ElevationRaster {
                texture: None,
                matrix: Mat4::IDENTITY,
            }),
            bound: Mutex::new(None),
            modifier,
        }
    }

    #[must_use]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    #[must_use]
    pub fn geometry(&self) -> &Arc<SharedGeometry> {
        &self.geometry
    }

    /// Replace the cached elevation raster. Returns whether it changed.
    pub fn set_elevation_raster(&self, texture: Option<TextureHandle>, matrix: Mat4) -> bool {
        if texture.is_none() {
            warn!(key = %self.key, "elevation raster is empty");
        }
        let mut raster = self.elevation.write().unwrap_or_else(PoisonError::into_inner);
        let same_texture = match (&raster.texture, &texture) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same_texture && raster.matrix == matrix {
            return false;
        }
        raster.texture = texture;
        raster.matrix = matrix;
        drop(raster);
        self.dirty_bound();
        true
    }

    #[must_use]
    pub fn elevation_raster(&self) -> Option<TextureHandle> {
        self.elevation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .texture
            .clone()
    }

    #[must_use]
    pub fn elevation_matrix(&self) -> Mat4 {
        self.elevation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .matrix
    }

    /// Force the next [`Self::bound`] call to recompute.
    pub fn dirty_bound(&self) {
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The tile's world-space box: its extent, with the height range of the
    /// part of the elevation raster this tile samples.
    pub fn bound(&self) -> BoundingBox {
        let mut cached = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bbox) = *cached {
            return bbox;
        }
        let extent = self.geometry.extent;
        let (z_min, z_max) = self.height_range();
        let mut bbox = BoundingBox::new(
            DVec3::new(extent.x_min, extent.y_min, z_min),
            DVec3::new(extent.x_max, extent.y_max, z_max),
        );
        if let Some(modifier) = &self.modifier {
            modifier.modify_bounding_box(&self.key, &mut bbox);
        }
        *cached = Some(bbox);
        bbox
    }

    /// Centre and radius of the bounding sphere.
    pub fn bounding_sphere(&self) -> (DVec3, f64) {
        let bbox = self.bound();
        (bbox.center(), bbox.radius())
    }

    /// Boxes of the four child quadrants, in quadrant order.
    pub fn child_boxes(&self) -> [BoundingBox; 4] {
        let bbox = self.bound();
        [0, 1, 2, 3].map(|q| bbox.quadrant(q))
    }

    /// True if any corner of any child box lies within the sphere, with
    /// distances scaled by `lod_scale`.
    pub fn any_child_box_intersects_sphere(&self, center: DVec3, radius2: f64, lod_scale: f64) -> bool {
        self.child_boxes().iter().any(|child| {
            child
                .corners()
                .iter()
                .any(|corner| ((*corner - center) * lod_scale).length_squared() <= radius2)
        })
    }

    fn height_range(&self) -> (f64, f64) {
        let raster = self.elevation.read().unwrap_or_else(PoisonError::into_inner);
        let Some(texture) = &raster.texture else {
            return (0.0, 0.0);
        };
        let image = texture.image();
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return (0.0, 0.0);
        }

        // Window of the raster covered by this tile; texture t grows northward
        // while image rows grow southward.
        let lo = raster.matrix * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let hi = raster.matrix * Vec4::new(1.0, 1.0, 0.0, 1.0);
        let max_col = (w - 1) as f32;
        let max_row = (h - 1) as f32;
        let col0 = (lo.x.min(hi.x) * max_col).floor().clamp(0.0, max_col) as u32;
        let col1 = (lo.x.max(hi.x) * max_col).ceil().clamp(0.0, max_col) as u32;
        let row0 = ((1.0 - lo.y.max(hi.y)) * max_row).floor().clamp(0.0, max_row) as u32;
        let row1 = ((1.0 - lo.y.min(hi.y)) * max_row).ceil().clamp(0.0, max_row) as u32;

        let mut z_min = f32::MAX;
        let mut z_max = f32::MIN;
        for row in row0..=row1 {
            for col in col0..=col1 {
                let z = image.get_pixel(col, row).0[0];
                if z.is_finite() {
                    z_min = z_min.min(z);
                    z_max = z_max.max(z);
                }
            }
        }
        if z_min > z_max {
            return (0.0, 0.0);
        }
        (f64::from(z_min), f64::from(z_max))
    }
}
