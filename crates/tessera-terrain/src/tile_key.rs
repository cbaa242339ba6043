//! Tile identity within a tiling profile: parent, child, quadrant and neighbour derivation.

use std::fmt;

/// A tiling profile: how many root tiles cover the map at LOD 0 and how large
/// the map is in projected metres.
///
/// The projected extent is centred on the origin. Tile row 0 is the northern
/// edge (y grows southward).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Profile {
    /// Root tiles along x at LOD 0.
    pub root_tiles_x: u32,
    /// Root tiles along y at LOD 0.
    pub root_tiles_y: u32,
    /// Total projected width in metres.
    pub width_m: u64,
    /// Total projected height in metres.
    pub height_m: u64,
}

/// Equatorial circumference of the WGS84 ellipsoid, rounded to metres.
const EARTH_CIRCUMFERENCE_M: u64 = 40_075_016;

impl Profile {
    /// Plate carrée over the whole globe: two square root tiles.
    #[must_use]
    pub fn global_geodetic() -> Self {
        Self::plane(2, 1, EARTH_CIRCUMFERENCE_M, EARTH_CIRCUMFERENCE_M / 2)
    }

    /// Spherical mercator over the whole globe: one root tile.
    #[must_use]
    pub fn spherical_mercator() -> Self {
        Self::plane(1, 1, EARTH_CIRCUMFERENCE_M, EARTH_CIRCUMFERENCE_M)
    }

    /// A local planar profile.
    ///
    /// # Panics
    ///
    /// Panics if any dimension is zero.
    #[must_use]
    pub fn plane(root_tiles_x: u32, root_tiles_y: u32, width_m: u64, height_m: u64) -> Self {
        assert!(root_tiles_x > 0 && root_tiles_y > 0, "profile needs root tiles");
        assert!(width_m > 0 && height_m > 0, "profile needs a non-empty extent");
        Self {
            root_tiles_x,
            root_tiles_y,
            width_m,
            height_m,
        }
    }

    /// Number of tiles along x and y at the given LOD, saturating at
    /// `u32::MAX`. [`TerrainEngine`](crate::TerrainEngine) refuses profiles
    /// that saturate at its `max_lod`.
    #[must_use]
    pub fn num_tiles(&self, lod: u32) -> (u32, u32) {
        self.checked_num_tiles(lod).unwrap_or((u32::MAX, u32::MAX))
    }

    /// Number of tiles along x and y at the given LOD, or `None` if either
    /// count overflows `u32`.
    #[must_use]
    pub fn checked_num_tiles(&self, lod: u32) -> Option<(u32, u32)> {
        let scale = 1u32.checked_shl(lod)?;
        Some((
            self.root_tiles_x.checked_mul(scale)?,
            self.root_tiles_y.checked_mul(scale)?,
        ))
    }

    /// The full projected extent.
    #[must_use]
    pub fn extent(&self) -> Extent {
        let half_w = self.width_m as f64 * 0.5;
        let half_h = self.height_m as f64 * 0.5;
        Extent::new(-half_w, -half_h, half_w, half_h)
    }

    /// Every root key at the given LOD, row-major.
    #[must_use]
    pub fn root_keys(&self, lod: u32) -> Vec<TileKey> {
        let (tx, ty) = self.num_tiles(lod);
        (0..ty)
            .flat_map(|y| (0..tx).map(move |x| (x, y)))
            .map(|(x, y)| TileKey::new(lod, x, y, *self))
            .collect()
    }
}

/// A projected 2D rectangle in metres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extent {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Extent {
    /// Create an extent, sorting the corners.
    #[must_use]
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x_min: x0.min(x1),
            y_min: y0.min(y1),
            x_max: x0.max(x1),
            y_max: y0.max(y1),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x_min + self.x_max) * 0.5,
            (self.y_min + self.y_max) * 0.5,
        )
    }

    /// Radius of the circle enclosing this extent.
    #[must_use]
    pub fn bounding_radius(&self) -> f64 {
        0.5 * self.width().hypot(self.height())
    }

    /// True if `other` lies entirely inside this extent.
    #[must_use]
    pub fn contains(&self, other: &Extent) -> bool {
        other.x_min >= self.x_min
            && other.x_max <= self.x_max
            && other.y_min >= self.y_min
            && other.y_max <= self.y_max
    }

    /// True if the two extents overlap with non-zero area.
    #[must_use]
    pub fn intersects(&self, other: &Extent) -> bool {
        self.x_min < other.x_max
            && self.x_max > other.x_min
            && self.y_min < other.y_max
            && self.y_max > other.y_min
    }
}

/// Uniquely identifies a tile: level of detail, column, row and tiling profile.
///
/// LOD 0 is the coarsest level. At LOD `l` the profile is divided into
/// `root_tiles_x << l` columns and `root_tiles_y << l` rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
    pub profile: Profile,
}

impl TileKey {
    /// Deepest supported level of detail.
    pub const MAX_LOD: u32 = tessera_config::MAX_LOD;

    /// Construct a key, validating it against the profile.
    ///
    /// # Panics
    ///
    /// Panics if `lod` exceeds [`Self::MAX_LOD`] or `x`/`y` are out of range.
    #[must_use]
    pub fn new(lod: u32, x: u32, y: u32, profile: Profile) -> Self {
        assert!(lod <= Self::MAX_LOD, "LOD {lod} exceeds MAX_LOD {}", Self::MAX_LOD);
        let (tx, ty) = profile.num_tiles(lod);
        assert!(x < tx, "x={x} out of range for LOD {lod} (max {tx})");
        assert!(y < ty, "y={y} out of range for LOD {lod} (max {ty})");
        Self { lod, x, y, profile }
    }

    /// The key one level coarser that contains this tile. `None` at LOD 0.
    #[must_use]
    pub fn parent(&self) -> Option<TileKey> {
        if self.lod == 0 {
            return None;
        }
        Some(TileKey {
            lod: self.lod - 1,
            x: self.x / 2,
            y: self.y / 2,
            profile: self.profile,
        })
    }

    /// The child key in the given quadrant (0 = NW, 1 = NE, 2 = SW, 3 = SE).
    ///
    /// # Panics
    ///
    /// Panics if `quadrant >= 4`.
    #[must_use]
    pub fn child_key(&self, quadrant: u32) -> TileKey {
        assert!(quadrant < 4, "quadrant {quadrant} out of range");
        TileKey {
            lod: self.lod + 1,
            x: self.x * 2 + (quadrant & 1),
            y: self.y * 2 + (quadrant >> 1),
            profile: self.profile,
        }
    }

    /// The quadrant this key occupies within its parent. Root keys report 0.
    #[must_use]
    pub fn quadrant(&self) -> u32 {
        if self.lod == 0 {
            return 0;
        }
        (self.x & 1) + 2 * (self.y & 1)
    }

    /// The key offset by `(dx, dy)` tiles at the same LOD.
    ///
    /// Both axes wrap modulo the tile count for every profile, planar ones
    /// included: on a local plane the tile past the east edge is the
    /// westernmost tile of the same row, and seam stitching against it
    /// samples the opposite edge of the map.
    #[must_use]
    pub fn neighbor_key(&self, dx: i32, dy: i32) -> TileKey {
        let (tx, ty) = self.profile.num_tiles(self.lod);
        let x = (i64::from(self.x) + i64::from(dx)).rem_euclid(i64::from(tx));
        let y = (i64::from(self.y) + i64::from(dy)).rem_euclid(i64::from(ty));
        TileKey {
            lod: self.lod,
            x: x as u32,
            y: y as u32,
            profile: self.profile,
        }
    }

    /// Projected extent covered by this tile.
    #[must_use]
    pub fn extent(&self) -> Extent {
        let full = self.profile.extent();
        let (tx, ty) = self.profile.num_tiles(self.lod);
        let tile_w = full.width() / f64::from(tx);
        let tile_h = full.height() / f64::from(ty);
        let x_min = full.x_min + tile_w * f64::from(self.x);
        let y_max = full.y_max - tile_h * f64::from(self.y);
        Extent::new(x_min, y_max - tile_h, x_min + tile_w, y_max)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.lod, self.x, self.y)
    }
}
