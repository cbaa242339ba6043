//! Procedural tile data: fBm elevation, finite-difference normals and a
//! height-banded imagery layer.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;
use image::{Rgba, Rgba32FImage};
use noise::{NoiseFn, Simplex};
use tessera_terrain::{
    CancelToken, LayerFilter, LayerModel, LayerUid, TerrainTileModel, Texture, TileKey,
    TileModelSource,
};
use tracing::trace;

/// The single imagery layer this source produces.
pub const IMAGERY: LayerUid = LayerUid(1);

/// Multi-octave simplex noise.
pub struct Fbm {
    noise: Simplex,
    octaves: u32,
    base_frequency: f64,
    amplitude: f64,
}

impl Fbm {
    pub fn new(seed: u32) -> Self {
        Self {
            noise: Simplex::new(seed),
            octaves: 6,
            base_frequency: 1.0 / 40_000.0,
            amplitude: 1200.0,
        }
    }

    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = self.base_frequency;
        let mut amplitude = self.amplitude;
        for _ in 0..self.octaves {
            total += self.noise.get([x * frequency, y * frequency]) * amplitude;
            frequency *= 2.0;
            amplitude *= 0.5;
        }
        total
    }
}

/// Builds every layer on the loader's worker threads.
pub struct ProceduralSource {
    heights: Fbm,
    raster_size: u32,
    /// Bumped to recolor the imagery; see [`ProceduralSource::next_palette`].
    palette: AtomicU32,
}

impl ProceduralSource {
    pub fn new(seed: u32, raster_size: u32) -> Self {
        Self {
            heights: Fbm::new(seed),
            raster_size: raster_size.max(2),
            palette: AtomicU32::new(0),
        }
    }

    /// Switch to the next imagery palette. Tiles pick it up once their
    /// imagery is reloaded.
    pub fn next_palette(&self) -> u32 {
        self.palette.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn heights_for(&self, key: &TileKey) -> Vec<f32> {
        let extent = key.extent();
        let n = self.raster_size;
        let step = 1.0 / f64::from(n - 1);
        let mut heights = Vec::with_capacity((n * n) as usize);
        // row 0 is the northern edge
        for row in 0..n {
            let y = extent.y_max - extent.height() * f64::from(row) * step;
            for col in 0..n {
                let x = extent.x_min + extent.width() * f64::from(col) * step;
                heights.push(self.heights.sample(x, y) as f32);
            }
        }
        heights
    }

    fn elevation(&self, heights: &[f32]) -> Rgba32FImage {
        let n = self.raster_size;
        Rgba32FImage::from_fn(n, n, |x, y| {
            let h = heights[(y * n + x) as usize];
            Rgba([h, 0.0, 0.0, 1.0])
        })
    }

    fn normals(&self, heights: &[f32], texel_size: f32) -> Rgba32FImage {
        let n = self.raster_size;
        let at = |x: i64, y: i64| {
            let x = x.clamp(0, i64::from(n) - 1) as u32;
            let y = y.clamp(0, i64::from(n) - 1) as u32;
            heights[(y * n + x) as usize]
        };
        Rgba32FImage::from_fn(n, n, |x, y| {
            let (x, y) = (i64::from(x), i64::from(y));
            let dx = (at(x + 1, y) - at(x - 1, y)) / (2.0 * texel_size);
            // rows grow southward
            let dy = (at(x, y - 1) - at(x, y + 1)) / (2.0 * texel_size);
            let normal = Vec3::new(-dx, -dy, 1.0).normalize();
            Rgba([normal.x, normal.y, normal.z, 1.0])
        })
    }

    fn imagery(&self, heights: &[f32]) -> Rgba32FImage {
        let n = self.raster_size;
        let palette = self.palette.load(Ordering::Relaxed);
        Rgba32FImage::from_fn(n, n, |x, y| {
            let h = heights[(y * n + x) as usize];
            let [r, g, b] = shade(h, palette);
            Rgba([r, g, b, 1.0])
        })
    }
}

fn shade(height: f32, palette: u32) -> [f32; 3] {
    let snow_line = if palette % 2 == 0 { 900.0 } else { 400.0 };
    match height {
        h if h < 0.0 => [0.1, 0.25, 0.6],
        h if h < 150.0 => [0.76, 0.7, 0.5],
        h if h < snow_line => [0.2, 0.5 - h / 4000.0, 0.15],
        _ => [0.95, 0.95, 0.97],
    }
}

impl TileModelSource for ProceduralSource {
    fn create_tile_model(
        &self,
        key: &TileKey,
        filter: &LayerFilter,
        cancel: &CancelToken,
    ) -> Option<TerrainTileModel> {
        if cancel.is_cancelled() {
            return None;
        }
        let heights = self.heights_for(key);
        if cancel.is_cancelled() {
            return None;
        }

        let texel_size = (key.extent().width() / f64::from(self.raster_size - 1)) as f32;
        let mut model = TerrainTileModel::new(*key);
        if filter.accepts_all() {
            model = model
                .with(LayerModel::Elevation {
                    texture: Texture::new(self.elevation(&heights)),
                })
                .with(LayerModel::Normal {
                    texture: Texture::new(self.normals(&heights, texel_size)),
                });
        }
        if filter.contains(IMAGERY) {
            model = model.with(LayerModel::Image {
                uid: IMAGERY,
                texture: Texture::new(self.imagery(&heights)),
                matrix: glam::Mat4::IDENTITY,
            });
        }
        trace!(%key, layers = model.layers.len(), "built tile model");
        Some(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_terrain::Profile;

    fn key() -> TileKey {
        TileKey::new(2, 1, 3, Profile::plane(1, 1, 100_000, 100_000))
    }

    #[test]
    fn test_fbm_is_deterministic() {
        let a = Fbm::new(7);
        let b = Fbm::new(7);
        assert_eq!(a.sample(1234.0, -987.0), b.sample(1234.0, -987.0));
    }

    #[test]
    fn test_full_load_has_every_layer() {
        let source = ProceduralSource::new(3, 9);
        let model = source
            .create_tile_model(&key(), &LayerFilter::all(), &CancelToken::new())
            .unwrap();
        assert_eq!(model.layers.len(), 3);
    }

    #[test]
    fn test_imagery_only_reload() {
        let source = ProceduralSource::new(3, 9);
        let model = source
            .create_tile_model(&key(), &LayerFilter::only([IMAGERY]), &CancelToken::new())
            .unwrap();
        assert_eq!(model.layers.len(), 1);
        assert_eq!(model.layers[0].uid(), Some(IMAGERY));
    }

    #[test]
    fn test_cancelled_load_produces_nothing() {
        let source = ProceduralSource::new(3, 9);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(source.create_tile_model(&key(), &LayerFilter::all(), &cancel).is_none());
    }

    #[test]
    fn test_flat_ground_normals_point_up() {
        let source = ProceduralSource::new(3, 4);
        let normals = source.normals(&[5.0; 16], 10.0);
        assert_eq!(normals.get_pixel(2, 1).0, [0.0, 0.0, 1.0, 1.0]);
    }
}
