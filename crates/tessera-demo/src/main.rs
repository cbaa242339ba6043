//! Headless demo that streams a procedural terrain through the tile cache
//! while a scripted camera flies over it.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p tessera-demo -- --frames 1200 --max-lod 12`.

mod flight;
mod source;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use clap::Parser;
use tessera_config::{CliArgs, Config, default_config_dir};
use tessera_terrain::{
    FrameStamp, Frustum, HorizonCuller, LayerFilter, PlanarGeometryPool, Profile, TerrainCuller,
    TerrainEngine, TileKey, TileNotifier,
};
use tracing::{debug, error, info};

use crate::flight::Flight;
use crate::source::{IMAGERY, ProceduralSource};

const MAP_SIZE_M: u64 = 200_000;
const EARTH_RADIUS_M: f64 = 6_371_000.0;
const VIEWPORT_WIDTH: f64 = 1920.0;
const VIEWPORT_HEIGHT: f64 = 1080.0;
const FRAME_TIME: Duration = Duration::from_millis(16);
const SEED: u32 = 0x7e55;
const RASTER_SIZE: u32 = 17;

/// Counts tile-added notifications.
#[derive(Default)]
struct TileCounter(AtomicUsize);

impl TileNotifier for TileCounter {
    fn on_tile_added(&self, _key: &TileKey) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    tessera_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let profile = Profile::plane(2, 2, MAP_SIZE_M, MAP_SIZE_M);
    let source = Arc::new(ProceduralSource::new(SEED, RASTER_SIZE));
    let notifier = Arc::new(TileCounter::default());
    let engine = match TerrainEngine::new(
        &config,
        profile,
        source.clone(),
        Arc::new(PlanarGeometryPool::new()),
        Some(notifier.clone()),
    ) {
        Ok(engine) => engine,
        Err(e) => {
            error!(%e, "failed to start terrain engine");
            std::process::exit(1);
        }
    };

    let flight = Flight::new(profile.extent());
    let fov = 60f64.to_radians();
    let frames = args.frames.max(1);
    let started = Instant::now();
    let mut merged = 0;
    let mut evicted = 0;

    info!(frames, max_lod = config.terrain.max_lod, "flight started");
    for frame in 1..=frames {
        let stamp = FrameStamp::new(frame, started.elapsed().as_secs_f64());
        let view = flight.view(frame, frames);
        let mut culler = TerrainCuller::new(stamp, view.eye)
            .with_viewport(VIEWPORT_HEIGHT, fov)
            .with_frustum(Frustum::from_view_projection(
                &view.view_projection(VIEWPORT_WIDTH / VIEWPORT_HEIGHT, fov),
            ))
            .with_horizon(HorizonCuller::new(view.eye, EARTH_RADIUS_M));
        engine.cull(&mut culler);
        let draws = culler.take_draws();

        let stats = engine.update(stamp);
        merged += stats.merged;
        evicted += stats.evicted;

        if config.debug.stealth {
            let mut replay = TerrainCuller::new(stamp, view.eye).with_stealth(true);
            engine.cull(&mut replay);
            debug!(frame, replayed = replay.draws().len(), "stealth replay");
        }

        if frame == frames / 2 {
            let palette = source.next_palette();
            engine.refresh_layers(&LayerFilter::only([IMAGERY]));
            info!(frame, palette, "imagery palette changed");
        }

        if frame % 60 == 0 || frame == frames {
            let deepest = draws.iter().map(|d| d.key.lod).max().unwrap_or(0);
            info!(
                frame,
                altitude = view.eye.z.round(),
                draws = draws.len(),
                deepest,
                live = stats.live_tiles,
                queued = stats.queued,
                in_flight = stats.in_flight,
                merged,
                evicted,
                "frame"
            );
        }

        std::thread::sleep(FRAME_TIME);
    }

    info!(
        elapsed_s = started.elapsed().as_secs_f64(),
        tiles_added = notifier.0.load(Ordering::Relaxed),
        live = engine.live_tile_count(),
        "flight finished"
    );
}
