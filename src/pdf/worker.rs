//! Session worker - owns the open document and runs renders off the foreground

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender};
use log::{debug, info, warn};

use super::backend::{DecodeBackend, DocumentHandle};
use super::request::{RenderRequest, RenderTarget, RequestId, SessionEvent};
use super::scheduler::RenderScheduler;

struct OpenDocument {
    generation: u64,
    handle: Box<dyn DocumentHandle>,
}

/// Process requests until `Shutdown` or until the viewer goes away
///
/// `active` is the generation the viewer currently shows. Page requests for
/// any other generation are answered with `Cancelled` without rendering, so
/// a superseded document never populates the cache.
#[expect(
    clippy::needless_pass_by_value,
    reason = "worker owns channel endpoints for its lifetime"
)]
pub fn session_worker<B: DecodeBackend>(
    backend: B,
    scheduler: Arc<RenderScheduler>,
    active: Arc<AtomicU64>,
    requests: Receiver<RenderRequest>,
    events: Sender<SessionEvent>,
) {
    let mut current: Option<OpenDocument> = None;

    for request in requests.iter() {
        match request {
            RenderRequest::Open { generation, path } => {
                close_document(&mut current, &scheduler);
                if generation != active.load(Ordering::SeqCst) {
                    debug!("Skipping open of {path:?} for superseded session {generation}");
                    continue;
                }
                current = open_document(&backend, generation, &path, &events);
            }

            RenderRequest::Page {
                id,
                generation,
                page,
                target,
            } => {
                handle_page_request(
                    current.as_ref(),
                    &scheduler,
                    &active,
                    (id, generation, page, target),
                    &events,
                );
            }

            RenderRequest::EvictAll { generation } => {
                if current.as_ref().is_some_and(|doc| doc.generation == generation) {
                    scheduler.evict_all();
                }
            }

            RenderRequest::Close => close_document(&mut current, &scheduler),

            RenderRequest::Shutdown => break,
        }
    }

    close_document(&mut current, &scheduler);
    debug!("Session worker stopped");
}

fn open_document<B: DecodeBackend>(
    backend: &B,
    generation: u64,
    path: &Path,
    events: &Sender<SessionEvent>,
) -> Option<OpenDocument> {
    match backend.open(path) {
        Ok(handle) => {
            let page_count = handle.page_count();
            info!("Opened {path:?} with {page_count} pages");
            let _ = events.send(SessionEvent::Opened {
                generation,
                page_count,
            });
            Some(OpenDocument { generation, handle })
        }
        Err(error) => {
            warn!("Failed to open {path:?}: {error}");
            let _ = events.send(SessionEvent::OpenFailed { generation, error });
            None
        }
    }
}

/// Drop every cached page, then the handle they were rendered from
fn close_document(current: &mut Option<OpenDocument>, scheduler: &RenderScheduler) {
    scheduler.evict_all();
    if let Some(doc) = current.take() {
        debug!("Closed document of session {}", doc.generation);
    }
}

fn handle_page_request(
    current: Option<&OpenDocument>,
    scheduler: &RenderScheduler,
    active: &AtomicU64,
    (id, generation, page, target): (RequestId, u64, usize, RenderTarget),
    events: &Sender<SessionEvent>,
) {
    let document = current.filter(|doc| {
        doc.generation == generation && generation == active.load(Ordering::SeqCst)
    });
    let Some(document) = document else {
        let _ = events.send(SessionEvent::Cancelled { id, page });
        return;
    };

    let event = match scheduler.ensure_rendered(page, document.handle.as_ref(), target) {
        Ok(data) => SessionEvent::Page {
            id,
            generation,
            page,
            data,
        },
        Err(error) => {
            warn!("Failed to render page {page}: {error}");
            SessionEvent::Error {
                id,
                generation,
                page,
                error,
            }
        }
    };
    let _ = events.send(event);
}
