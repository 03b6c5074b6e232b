//! Paged viewer - ties downloads, the session worker and the transform together

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, Sender};
use log::{debug, error, info, warn};

use super::backend::{DecodeBackend, DecodeError};
use super::request::{RenderRequest, RenderError, RenderTarget, RequestId, SessionEvent};
use super::scheduler::{RenderScheduler, SchedulerStats};
use super::state::{Command, Effect, SessionPhase, ViewerState};
use super::types::PixelImage;
use super::worker::session_worker;
use super::zoom::{GestureEvent, ListBounds, ViewportController, ViewportSize, ViewportState};
use crate::download::{DownloadCache, DownloadError, DownloadState, UreqTransport};
use crate::settings::ViewerSettings;

/// Why a document could not be shown
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("document could not be opened: {0}")]
    Decode(#[from] DecodeError),
}

/// Notification for the display layer
#[derive(Clone, Debug, PartialEq)]
pub enum ViewerEvent {
    DownloadProgress(f32),
    DocumentReady { page_count: usize },
    DocumentFailed(LoadError),
    /// A visible page has pixels available through [`PagedViewer::page`]
    PageReady(usize),
    PageFailed { page: usize, error: RenderError },
    TransformChanged(ViewportState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingRequest {
    Page(usize),
    Prefetch(usize),
}

impl PendingRequest {
    fn page(self) -> usize {
        match self {
            Self::Page(page) | Self::Prefetch(page) => page,
        }
    }
}

/// Orchestrates one viewing session at a time
///
/// Lives on the foreground: every method is non-blocking except
/// [`PagedViewer::wait`] and [`PagedViewer::shutdown`]. Downloads run on
/// short-lived threads, opening and rendering on one session worker; their
/// results come back through a single channel drained by `poll`.
pub struct PagedViewer {
    state: ViewerState,
    controller: ViewportController,
    transform: ViewportState,
    downloads: Arc<DownloadCache>,
    download_state: DownloadState,
    scheduler: Arc<RenderScheduler>,
    active_generation: Arc<AtomicU64>,
    request_tx: Sender<RenderRequest>,
    event_tx: Sender<SessionEvent>,
    event_rx: Receiver<SessionEvent>,
    worker: Option<JoinHandle<()>>,
    next_request_id: u64,
    pending_requests: HashMap<RequestId, PendingRequest>,
    published: BTreeMap<usize, Arc<PixelImage>>,
    failed_pages: HashMap<usize, RenderError>,
    load_error: Option<LoadError>,
    outbox: Vec<ViewerEvent>,
}

impl PagedViewer {
    /// Create a viewer over `backend`, resolving references through `downloads`
    pub fn new<B: DecodeBackend>(
        backend: B,
        downloads: DownloadCache,
        settings: &ViewerSettings,
    ) -> Self {
        let settings = settings.sanitized();
        let scheduler = Arc::new(RenderScheduler::new(settings.memory_cache_byte_count));
        let active_generation = Arc::new(AtomicU64::new(0));

        let (request_tx, request_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            let active = Arc::clone(&active_generation);
            let events = event_tx.clone();
            std::thread::Builder::new()
                .name("pageview-session".into())
                .spawn(move || session_worker(backend, scheduler, active, request_rx, events))
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn session worker: {e}");
                None
            }
        };

        Self {
            state: ViewerState::new(&settings),
            controller: ViewportController::new(ViewportSize::new(0.0, 0.0), settings.max_zoom),
            transform: ViewportState::default(),
            downloads: Arc::new(downloads),
            download_state: DownloadState::Idle,
            scheduler,
            active_generation,
            request_tx,
            event_tx,
            event_rx,
            worker,
            next_request_id: 1,
            pending_requests: HashMap::new(),
            published: BTreeMap::new(),
            failed_pages: HashMap::new(),
            load_error: None,
            outbox: Vec::new(),
        }
    }

    /// Create a viewer downloading over HTTP into the configured cache dir
    pub fn with_settings<B: DecodeBackend>(
        backend: B,
        settings: &ViewerSettings,
    ) -> Result<Self, DownloadError> {
        let downloads = DownloadCache::open(
            settings.download_dir(),
            Arc::new(UreqTransport::new()),
            settings.download_cache_enabled,
        )?;
        Ok(Self::new(backend, downloads, settings))
    }

    /// Start showing the document at `reference` (path or URL)
    ///
    /// The previous document, its cached pages and any in-flight work for it
    /// are released first.
    pub fn load(&mut self, reference: &str) {
        info!("Loading {reference}");
        self.apply_command(Command::Load(reference.to_string()));
    }

    /// Load the current reference again after a failure
    pub fn retry(&mut self) {
        self.apply_command(Command::Retry);
    }

    /// Release the current document
    pub fn close(&mut self) {
        self.apply_command(Command::Close);
        self.load_error = None;
        self.download_state.reset();
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.apply_command(Command::SetViewport(ViewportSize::new(width, height)));
    }

    /// Pages currently on screen, `start..end`
    pub fn set_visible_range(&mut self, range: Range<usize>) {
        self.apply_command(Command::SetVisibleRange(range));
        self.rerequest_released();
    }

    /// Whether the page list can still scroll each way
    pub fn set_list_bounds(&mut self, bounds: ListBounds) {
        self.apply_command(Command::SetScrollBounds(bounds));
    }

    /// Apply a gesture to the transform; returns how far to scroll the list
    pub fn handle_gesture(&mut self, event: GestureEvent) -> f32 {
        let transition = self
            .controller
            .apply(self.transform, event, self.state.list_bounds());
        self.set_transform(transition.state);
        transition.scroll_delta
    }

    /// Drain finished background work without blocking
    pub fn poll(&mut self) -> Vec<ViewerEvent> {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_session_event(event);
        }
        std::mem::take(&mut self.outbox)
    }

    /// Block up to `timeout` for background work, then drain like `poll`
    pub fn wait(&mut self, timeout: Duration) -> Vec<ViewerEvent> {
        if self.outbox.is_empty() {
            if let Ok(event) = self.event_rx.recv_timeout(timeout) {
                self.handle_session_event(event);
            }
        }
        self.poll()
    }

    fn apply_command(&mut self, cmd: Command) {
        let effects = self.state.apply(cmd);
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::CloseDocument => {
                    self.active_generation
                        .store(self.state.generation(), Ordering::SeqCst);
                    self.pending_requests.clear();
                    self.failed_pages.clear();
                    let _ = self.request_tx.send(RenderRequest::Close);
                }

                Effect::ClearPublished => self.published.clear(),

                Effect::StartDownload {
                    generation,
                    reference,
                } => self.start_download(generation, reference),

                Effect::OpenDocument { generation, path } => {
                    let _ = self
                        .request_tx
                        .send(RenderRequest::Open { generation, path });
                }

                Effect::InvalidateCache => {
                    self.pending_requests.clear();
                    self.failed_pages.clear();
                    let _ = self.request_tx.send(RenderRequest::EvictAll {
                        generation: self.state.generation(),
                    });
                }

                Effect::RenderPage(page) => self.request_page(PendingRequest::Page(page)),

                Effect::PrefetchPage(page) => self.request_page(PendingRequest::Prefetch(page)),

                Effect::PrunePublished => {
                    let visible = self.state.visible_pages();
                    self.published.retain(|page, _| visible.contains(page));
                }

                Effect::ReclampTransform => {
                    self.controller.set_viewport(self.state.viewport());
                    self.set_transform(self.controller.clamp(self.transform));
                }
            }
        }
    }

    fn start_download(&mut self, generation: u64, reference: String) {
        self.load_error = None;
        self.download_state.reset();
        self.download_state.on_progress(0.0);
        let downloads = Arc::clone(&self.downloads);
        let events = self.event_tx.clone();

        let spawned = std::thread::Builder::new()
            .name("pageview-download".into())
            .spawn(move || {
                let progress = events.clone();
                let result = downloads.resolve(&reference, |fraction| {
                    let _ = progress.send(SessionEvent::DownloadProgress {
                        generation,
                        fraction,
                    });
                });
                let _ = events.send(SessionEvent::Resolved { generation, result });
            });

        if let Err(e) = spawned {
            let error = DownloadError::network(format!("cannot start download: {e}"));
            let _ = self.event_tx.send(SessionEvent::Resolved {
                generation,
                result: Err(error),
            });
        }
    }

    /// Ask the worker for `page` unless it is already available or in flight
    fn request_page(&mut self, request: PendingRequest) {
        let page = request.page();
        let visible = matches!(request, PendingRequest::Page(_));
        if visible && self.published.contains_key(&page) {
            return;
        }
        if self.failed_pages.contains_key(&page) {
            return;
        }

        let in_flight = self
            .pending_requests
            .iter()
            .find(|(_, pending)| pending.page() == page)
            .map(|(id, pending)| (*id, *pending));
        match in_flight {
            // A prefetch already queued for a page that became visible is
            // upgraded so its result gets published.
            Some((id, PendingRequest::Prefetch(_))) if visible => {
                self.pending_requests.insert(id, request);
                return;
            }
            Some(_) => return,
            None => {}
        }

        let id = self.next_id();
        let sent = self.request_tx.send(RenderRequest::Page {
            id,
            generation: self.state.generation(),
            page,
            target: self.state.render_target(),
        });
        if sent.is_ok() {
            self.pending_requests.insert(id, request);
        } else {
            warn!("Session worker is gone, cannot render page {page}");
        }
    }

    /// Published pages whose pixels were released by cache pressure are
    /// requested again, unless the visible pages cannot all be cached and
    /// would keep evicting each other
    fn rerequest_released(&mut self) {
        if !self.state.visible_fits_cache() {
            return;
        }
        let released: Vec<usize> = self
            .published
            .iter()
            .filter(|(_, image)| image.is_released())
            .map(|(page, _)| *page)
            .collect();
        for page in released {
            self.published.remove(&page);
            self.request_page(PendingRequest::Page(page));
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        if let Some(generation) = event.generation() {
            if generation != self.state.generation() {
                debug!("Discarding result of superseded session {generation}");
                if let SessionEvent::Page { data, .. } = &event {
                    debug!("Dropping stale page ({} bytes)", data.byte_size());
                }
                return;
            }
        }

        match event {
            SessionEvent::DownloadProgress { fraction, .. } => {
                self.download_state.on_progress(fraction);
                if let Some(progress) = self.download_state.progress() {
                    self.outbox.push(ViewerEvent::DownloadProgress(progress));
                }
            }

            SessionEvent::Resolved { generation, result } => {
                self.download_state.on_finished(result.clone());
                match result {
                    Ok(path) => {
                        debug!("Resolved session {generation} to {path:?}");
                        self.apply_command(Command::Resolved { generation, path });
                    }
                    Err(error) => {
                        error!("Failed to resolve document: {error}");
                        self.apply_command(Command::ResolveFailed { generation });
                        self.fail_document(LoadError::Download(error));
                    }
                }
            }

            SessionEvent::Opened {
                generation,
                page_count,
            } => {
                self.outbox.push(ViewerEvent::DocumentReady { page_count });
                self.apply_command(Command::DocumentOpened {
                    generation,
                    page_count,
                });
            }

            SessionEvent::OpenFailed { generation, error } => {
                error!("Failed to open document: {error}");
                self.apply_command(Command::OpenFailed { generation });
                self.fail_document(LoadError::Decode(error));
            }

            SessionEvent::Page { id, page, data, .. } => {
                let Some(request) = self.pending_requests.remove(&id) else {
                    return;
                };
                self.failed_pages.remove(&page);
                let visible = self.state.visible_pages().contains(&page);
                if matches!(request, PendingRequest::Page(_)) && visible {
                    if !data.is_released() {
                        self.published.insert(page, data);
                        self.outbox.push(ViewerEvent::PageReady(page));
                    } else if self.state.visible_fits_cache() {
                        debug!("Page {page} was evicted before it could be shown");
                        self.request_page(request);
                    }
                }
                // Inserting this page may have pushed a published one out.
                self.rerequest_released();
            }

            SessionEvent::Error {
                id, page, error, ..
            } => {
                if self.pending_requests.remove(&id).is_none() {
                    return;
                }
                self.failed_pages.insert(page, error.clone());
                self.outbox.push(ViewerEvent::PageFailed { page, error });
            }

            SessionEvent::Cancelled { id, page } => {
                if self.pending_requests.remove(&id).is_some() {
                    debug!("Render of page {page} was cancelled");
                }
            }
        }
    }

    fn fail_document(&mut self, error: LoadError) {
        self.load_error = Some(error.clone());
        self.outbox.push(ViewerEvent::DocumentFailed(error));
    }

    fn set_transform(&mut self, transform: ViewportState) {
        if transform != self.transform {
            self.transform = transform;
            self.outbox.push(ViewerEvent::TransformChanged(transform));
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    /// Pixels of a visible page, if rendered and still held
    #[must_use]
    pub fn page(&self, index: usize) -> Option<Arc<PixelImage>> {
        self.published
            .get(&index)
            .filter(|image| !image.is_released())
            .cloned()
    }

    /// Every published visible page, in page order
    #[must_use]
    pub fn visible_pages(&self) -> Vec<(usize, Arc<PixelImage>)> {
        self.published
            .iter()
            .filter(|(_, image)| !image.is_released())
            .map(|(page, image)| (*page, Arc::clone(image)))
            .collect()
    }

    #[must_use]
    pub fn transform(&self) -> ViewportState {
        self.transform
    }

    #[must_use]
    pub fn download_state(&self) -> &DownloadState {
        &self.download_state
    }

    #[must_use]
    pub fn load_error(&self) -> Option<&LoadError> {
        self.load_error.as_ref()
    }

    #[must_use]
    pub fn page_count(&self) -> Option<usize> {
        self.state.page_count()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Why `index` has no pixels, if its last render failed
    #[must_use]
    pub fn page_error(&self, index: usize) -> Option<&RenderError> {
        self.failed_pages.get(&index)
    }

    #[must_use]
    pub fn render_target(&self) -> RenderTarget {
        self.state.render_target()
    }

    #[must_use]
    pub fn controller(&self) -> &ViewportController {
        &self.controller
    }

    /// True when no download or render is outstanding
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_requests.is_empty()
            && !matches!(
                self.state.phase(),
                SessionPhase::Resolving | SessionPhase::Opening
            )
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    #[must_use]
    pub fn downloads(&self) -> &DownloadCache {
        &self.downloads
    }

    /// Stop the session worker and wait for it to release the document
    pub fn shutdown(&mut self) {
        let _ = self.request_tx.send(RenderRequest::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Session worker panicked");
            }
        }
    }
}

impl Drop for PagedViewer {
    fn drop(&mut self) {
        let _ = self.request_tx.send(RenderRequest::Shutdown);
    }
}
