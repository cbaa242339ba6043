//! Asynchronous tile data loading.
//!
//! Each tile owns one persistent [`LoadRequest`]. Traversal hands it to a
//! [`Loader`] with a priority; the [`PagerLoader`] keeps a re-prioritisable
//! queue, feeds the best requests to a worker pool once per frame and returns
//! finished requests through a channel so the owning thread can merge them.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use rustc_hash::FxHashMap;
use tessera_config::LoaderOptions;
use tracing::{debug, trace};

use crate::context::EngineContext;
use crate::layer::{CancelToken, LayerFilter, TerrainTileModel, TileModelSource};
use crate::tile_key::TileKey;
use crate::tile_node::TileNode;

/// Errors raised while setting up or talking to the loader.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// A worker thread could not be started.
    #[error("failed to spawn loader worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// Every worker has exited.
    #[error("loader workers have shut down")]
    Disconnected,
}

/// Lifecycle of a [`LoadRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    /// Not queued. The tile may submit it.
    Idle = 0,
    /// Waiting in the loader queue.
    Queued = 1,
    /// Handed to a worker.
    Running = 2,
    /// Data fetched, waiting to be merged.
    Delivered = 3,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RequestState::Queued,
            2 => RequestState::Running,
            3 => RequestState::Delivered,
            _ => RequestState::Idle,
        }
    }
}

/// The persistent data request of one tile.
pub struct LoadRequest {
    key: TileKey,
    tile: Weak<TileNode>,
    filter: Mutex<LayerFilter>,
    state: AtomicU8,
    priority: AtomicU64,
    last_submitted_frame: AtomicU64,
    cancellable: AtomicBool,
    cancel: CancelToken,
    model: Mutex<Option<TerrainTileModel>>,
}

impl std::fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRequest")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

impl LoadRequest {
    /// A cancellable request for every layer of the tile.
    #[must_use]
    pub fn new(key: TileKey, tile: Weak<TileNode>) -> Self {
        Self {
            key,
            tile,
            filter: Mutex::new(LayerFilter::all()),
            state: AtomicU8::new(RequestState::Idle as u8),
            priority: AtomicU64::new(0f32.to_bits().into()),
            last_submitted_frame: AtomicU64::new(0),
            cancellable: AtomicBool::new(true),
            cancel: CancelToken::new(),
            model: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    /// The requesting tile, if it is still alive.
    #[must_use]
    pub fn tile(&self) -> Option<Arc<TileNode>> {
        self.tile.upgrade()
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RequestState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: RequestState, to: RequestState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Relaxed) as u32)
    }

    #[must_use]
    pub fn last_submitted_frame(&self) -> u64 {
        self.last_submitted_frame.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn filter(&self) -> LayerFilter {
        self.filter.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_filter(&self, filter: LayerFilter) {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        self.cancellable.load(Ordering::Relaxed)
    }

    /// Synchronous loads turn cancellation off.
    pub fn set_enable_cancellation(&self, enable: bool) {
        self.cancellable.store(enable, Ordering::Relaxed);
    }

    /// Flag the request as cancelled. Honoured only while cancellation is enabled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.is_cancellable() && self.cancel.is_cancelled()
    }

    /// Fetch the tile's data on the calling thread. Returns whether a model
    /// was produced.
    pub fn invoke(&self, source: &dyn TileModelSource) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let filter = self.filter();
        let model = source.create_tile_model(&self.key, &filter, &self.cancel);
        if self.is_cancelled() {
            trace!(key = %self.key, "load cancelled during fetch");
            return false;
        }
        let produced = model.is_some();
        *self.model.lock().unwrap_or_else(PoisonError::into_inner) = model;
        produced
    }

    /// Merge fetched data into the tile and clear its dirty flag. A missing
    /// model or a dead tile leaves nothing to do. Returns whether a merge
    /// happened.
    pub fn apply(&self, ctx: &EngineContext) -> bool {
        let model = self.model.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.set_state(RequestState::Idle);
        let (Some(model), Some(tile)) = (model, self.tile()) else {
            return false;
        };
        tile.merge(&model, ctx);
        self.set_filter(LayerFilter::all());
        tile.set_dirty(false);
        true
    }
}

/// Composite load priority: an LOD band term plus an inverse-distance term.
///
/// The LOD term is `lod` with high-resolution-first, `num_lods - lod`
/// otherwise. The distance term `1 - distance / range0` is clamped to `[0, 1]`.
/// The two are summed so the LOD band dominates and distance breaks ties.
#[must_use]
pub fn load_priority(lod: u32, num_lods: u32, high_resolution_first: bool, distance: f64, range0: f64) -> f32 {
    let lod_priority = if high_resolution_first {
        lod as f32
    } else {
        num_lods.saturating_sub(lod) as f32
    };
    let dist_priority = if range0 > 0.0 {
        (1.0 - distance / range0).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };
    lod_priority + dist_priority
}

#[derive(Clone, Debug)]
struct QueueEntry {
    key: TileKey,
    priority: f32,
    generation: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Highest priority first; among equals, the oldest submission.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// Priority queue of load requests, one live entry per tile key.
///
/// Re-pushing a key supersedes its earlier entry; superseded entries are
/// skipped lazily on pop and swept out once they outnumber the live ones.
#[derive(Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueueEntry>,
    live: FxHashMap<TileKey, LiveEntry>,
    next_generation: u64,
}

struct LiveEntry {
    generation: u64,
    priority: f32,
    request: Arc<LoadRequest>,
}

impl RequestQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-prioritise a request.
    pub fn push(&mut self, request: Arc<LoadRequest>, priority: f32) {
        let key = *request.key();
        if let Some(live) = self.live.get_mut(&key) {
            if live.priority.total_cmp(&priority).is_eq() {
                // same slot in the heap; keep its age
                live.request = request;
                return;
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.live.insert(
            key,
            LiveEntry {
                generation,
                priority,
                request,
            },
        );
        self.heap.push(QueueEntry {
            key,
            priority,
            generation,
        });
        self.compact();
    }

    /// Remove and return the highest-priority request.
    pub fn pop(&mut self) -> Option<Arc<LoadRequest>> {
        while let Some(entry) = self.heap.pop() {
            if self
                .live
                .get(&entry.key)
                .is_some_and(|live| live.generation == entry.generation)
            {
                return self.live.remove(&entry.key).map(|live| live.request);
            }
        }
        None
    }

    /// Drop the entry for `key`, if any.
    pub fn remove(&mut self, key: &TileKey) -> Option<Arc<LoadRequest>> {
        let removed = self.live.remove(key).map(|live| live.request);
        self.compact();
        removed
    }

    /// Rebuild the heap from the live entries once stale ones dominate.
    fn compact(&mut self) {
        if self.heap.len() <= 2 * self.live.len().max(8) {
            return;
        }
        self.heap = self
            .live
            .iter()
            .map(|(key, live)| QueueEntry {
                key: *key,
                priority: live.priority,
                generation: live.generation,
            })
            .collect();
    }

    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.live.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}

/// Schedules tile loads.
pub trait Loader: Send + Sync {
    /// Queue or re-prioritise `request`. Never blocks. Returns false if the
    /// request is already running or waiting to be merged.
    fn load(&self, request: &Arc<LoadRequest>, priority: f32, frame: u64) -> bool;

    /// Withdraw a queued request.
    fn cancel(&self, request: &LoadRequest);

    /// Start queued work for this frame. Returns how many requests started.
    fn dispatch(&self, frame: u64) -> usize;

    /// Requests whose data is ready to merge.
    fn drain_results(&self) -> Vec<Arc<LoadRequest>>;

    /// Requests waiting in the queue.
    fn queued(&self) -> usize;

    /// Requests handed to workers and not yet delivered.
    fn in_flight(&self) -> u64;
}

/// A [`Loader`] backed by a pool of worker threads.
pub struct PagerLoader {
    queue: Mutex<RequestQueue>,
    task_sender: Sender<Arc<LoadRequest>>,
    result_receiver: Receiver<Arc<LoadRequest>>,
    in_flight: Arc<AtomicU64>,
    max_requests_per_frame: usize,
}

impl PagerLoader {
    /// Spawn the worker pool. Zero `worker_threads` picks one per spare CPU.
    pub fn new(source: Arc<dyn TileModelSource>, options: &LoaderOptions) -> Result<Self, LoaderError> {
        let threads = if options.worker_threads == 0 {
            num_cpus::get().saturating_sub(2).max(1)
        } else {
            options.worker_threads
        };
        let max_requests_per_frame = options.max_requests_per_frame.max(1);
        let (task_sender, task_receiver) = bounded::<Arc<LoadRequest>>(max_requests_per_frame * 2);
        let (result_sender, result_receiver) = bounded::<Arc<LoadRequest>>(options.result_capacity.max(1));
        let in_flight = Arc::new(AtomicU64::new(0));

        for n in 0..threads {
            let receiver = task_receiver.clone();
            let sender = result_sender.clone();
            let source = Arc::clone(&source);
            let in_flight = Arc::clone(&in_flight);
            std::thread::Builder::new()
                .name(format!("tile-loader-{n}"))
                .spawn(move || {
                    while let Ok(request) = receiver.recv() {
                        if request.is_cancelled() {
                            request.set_state(RequestState::Idle);
                            in_flight.fetch_sub(1, Ordering::Relaxed);
                            continue;
                        }
                        let start = Instant::now();
                        let produced = request.invoke(source.as_ref());
                        trace!(
                            key = %request.key(),
                            produced,
                            elapsed_us = start.elapsed().as_micros() as u64,
                            "tile data fetched"
                        );
                        request.set_state(RequestState::Delivered);
                        let _ = sender.send(request);
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                })
                .map_err(LoaderError::WorkerSpawn)?;
        }
        debug!(threads, max_requests_per_frame, "loader started");

        Ok(Self {
            queue: Mutex::new(RequestQueue::new()),
            task_sender,
            result_receiver,
            in_flight,
            max_requests_per_frame,
        })
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Loader for PagerLoader {
    fn load(&self, request: &Arc<LoadRequest>, priority: f32, frame: u64) -> bool {
        if !request.transition(RequestState::Idle, RequestState::Queued)
            && request.state() != RequestState::Queued
        {
            return false;
        }
        request.cancel.reset();
        request.priority.store(u64::from(priority.to_bits()), Ordering::Relaxed);
        request.last_submitted_frame.store(frame, Ordering::Relaxed);
        self.queue().push(Arc::clone(request), priority);
        true
    }

    fn cancel(&self, request: &LoadRequest) {
        request.cancel();
        if self.queue().remove(request.key()).is_some() {
            request.set_state(RequestState::Idle);
        }
    }

    fn dispatch(&self, frame: u64) -> usize {
        let mut queue = self.queue();
        let mut started = 0;
        while started < self.max_requests_per_frame {
            let Some(request) = queue.pop() else {
                break;
            };
            // Requests not renewed this frame belong to tiles that left the view.
            let stale = request.is_cancellable() && request.last_submitted_frame() < frame;
            if stale || request.tile().is_none() {
                trace!(key = %request.key(), "dropping stale load request");
                request.set_state(RequestState::Idle);
                continue;
            }
            request.set_state(RequestState::Running);
            self.in_flight.fetch_add(1, Ordering::Relaxed);
            match self.task_sender.try_send(request) {
                Ok(()) => started += 1,
                Err(TrySendError::Full(request) | TrySendError::Disconnected(request)) => {
                    self.in_flight.fetch_sub(1, Ordering::Relaxed);
                    request.set_state(RequestState::Queued);
                    let priority = request.priority();
                    queue.push(request, priority);
                    break;
                }
            }
        }
        started
    }

    fn drain_results(&self) -> Vec<Arc<LoadRequest>> {
        self.result_receiver.try_iter().collect()
    }

    fn queued(&self) -> usize {
        self.queue().len()
    }

    fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}
