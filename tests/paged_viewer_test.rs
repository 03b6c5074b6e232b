use std::sync::Arc;
use std::time::{Duration, Instant};

use pageview::download::DownloadCache;
use pageview::pdf::{
    GestureEvent, ListBounds, Offset, PagedViewer, SessionPhase, ViewerEvent,
};
use pageview::settings::ViewerSettings;
use pageview::test_utils::test_helpers::{
    MemoryBackend, ScriptedResponse, ScriptedTransport, document_bytes, page_color,
    write_document,
};
use tempfile::TempDir;

const URL: &str = "https://books.example.net/atlas.pdf";

// 16x32 RGBA pages: 2048 bytes each
fn small_pages(capacity_pages: usize, prefetch_radius: usize) -> ViewerSettings {
    ViewerSettings {
        memory_cache_byte_count: capacity_pages * 2048,
        min_page_width: 16,
        max_page_width: 16,
        page_aspect_ratio: 2.0,
        prefetch_radius,
        ..ViewerSettings::default()
    }
}

fn open_viewer(
    dir: &TempDir,
    backend: MemoryBackend,
    transport: Arc<ScriptedTransport>,
    settings: &ViewerSettings,
) -> PagedViewer {
    let downloads = DownloadCache::open(dir.path().join("downloads"), transport, true).unwrap();
    let mut viewer = PagedViewer::new(backend, downloads, settings);
    viewer.set_viewport(360.0, 640.0);
    viewer
}

fn pump_until(viewer: &mut PagedViewer, done: impl Fn(&PagedViewer) -> bool) -> Vec<ViewerEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = viewer.poll();
    while !done(viewer) {
        assert!(Instant::now() < deadline, "timed out, got {events:?}");
        events.extend(viewer.wait(Duration::from_millis(20)));
    }
    events
}

#[test]
fn remote_document_end_to_end() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(URL, ScriptedResponse::ok(document_bytes(12)));
    let backend = MemoryBackend::new();
    let probe = backend.probe();
    let mut viewer = open_viewer(&dir, backend, transport.clone(), &small_pages(10, 1));

    viewer.set_visible_range(0..2);
    viewer.load(URL);
    let events = pump_until(&mut viewer, |v| v.visible_pages().len() == 2 && v.is_idle());

    assert!(events.contains(&ViewerEvent::DocumentReady { page_count: 12 }));
    let pages: Vec<usize> = viewer.visible_pages().iter().map(|(i, _)| *i).collect();
    assert_eq!(pages, vec![0, 1]);
    let image = viewer.page(0).unwrap();
    assert_eq!((image.width(), image.height()), (16, 32));
    assert_eq!(image.with_pixels(|px| px[..4].to_vec()).unwrap(), page_color(0));

    // Page 2 was prefetched into the cache but is not published.
    assert!(viewer.page(2).is_none());
    assert_eq!(probe.rendered_pages(), vec![0, 1, 2]);
    assert_eq!(viewer.stats().cached_pages, 3);

    // Scrolling onto the prefetched page is a cache hit.
    viewer.set_visible_range(1..3);
    pump_until(&mut viewer, |v| v.page(2).is_some() && v.is_idle());
    let stats = viewer.stats();
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(probe.rendered_pages(), vec![0, 1, 2, 3]);
}

#[test]
fn reopening_the_same_url_skips_the_network() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(URL, ScriptedResponse::ok(document_bytes(3)));
    let mut viewer = open_viewer(
        &dir,
        MemoryBackend::new(),
        transport.clone(),
        &small_pages(4, 0),
    );

    viewer.load(URL);
    pump_until(&mut viewer, |v| v.page_count().is_some());
    viewer.close();
    viewer.load(URL);
    pump_until(&mut viewer, |v| v.page_count().is_some());

    assert_eq!(transport.calls(URL), 1);
}

#[test]
fn switching_documents_releases_the_old_one() {
    let dir = TempDir::new().unwrap();
    let first = write_document(dir.path(), "first.doc", 4);
    let second = write_document(dir.path(), "second.doc", 7);
    let backend = MemoryBackend::new();
    let probe = backend.probe();
    let mut viewer = open_viewer(
        &dir,
        backend,
        Arc::new(ScriptedTransport::new()),
        &small_pages(8, 0),
    );

    viewer.set_visible_range(0..2);
    viewer.load(first.to_str().unwrap());
    pump_until(&mut viewer, |v| v.visible_pages().len() == 2);
    let old_pages: Vec<_> = viewer.visible_pages().into_iter().map(|(_, img)| img).collect();

    viewer.load(second.to_str().unwrap());
    assert!(viewer.visible_pages().is_empty());
    pump_until(&mut viewer, |v| v.page_count() == Some(7) && v.visible_pages().len() == 2);

    assert!(old_pages.iter().all(|img| img.is_released()));
    assert_eq!(probe.open_documents(), 1);
    assert_eq!(viewer.stats().cached_pages, 2);
}

#[test]
fn memory_stays_within_capacity_while_scrolling() {
    let dir = TempDir::new().unwrap();
    let path = write_document(dir.path(), "long.doc", 40);
    let mut viewer = open_viewer(
        &dir,
        MemoryBackend::new(),
        Arc::new(ScriptedTransport::new()),
        &small_pages(3, 1),
    );

    viewer.load(path.to_str().unwrap());
    pump_until(&mut viewer, |v| v.page_count().is_some());

    for start in 0..20 {
        viewer.set_visible_range(start..start + 1);
        pump_until(&mut viewer, |v| v.page(start).is_some() && v.is_idle());
        let stats = viewer.stats();
        assert!(stats.cached_bytes <= stats.capacity_bytes);
    }
}

fn shown(viewer: &PagedViewer) -> Vec<usize> {
    viewer.visible_pages().iter().map(|(i, _)| *i).collect()
}

#[test]
fn prefetch_never_pushes_out_visible_pages() {
    let dir = TempDir::new().unwrap();
    let path = write_document(dir.path(), "doc", 10);
    let backend = MemoryBackend::new();
    let probe = backend.probe();
    let mut viewer = open_viewer(
        &dir,
        backend,
        Arc::new(ScriptedTransport::new()),
        &small_pages(3, 1),
    );

    viewer.set_visible_range(1..3);
    viewer.load(path.to_str().unwrap());
    pump_until(&mut viewer, |v| v.page_count().is_some() && v.is_idle());

    assert_eq!(shown(&viewer), vec![1, 2]);
    // Only one page of spare room: the page after the visible range.
    assert_eq!(probe.rendered_pages(), vec![1, 2, 3]);
    assert_eq!(viewer.stats().cached_pages, 3);
}

#[test]
fn visible_page_evicted_by_a_later_render_is_shown_again() {
    let dir = TempDir::new().unwrap();
    let path = write_document(dir.path(), "doc", 10);
    let mut viewer = open_viewer(
        &dir,
        MemoryBackend::new(),
        Arc::new(ScriptedTransport::new()),
        &small_pages(3, 0),
    );

    viewer.set_visible_range(0..2);
    viewer.load(path.to_str().unwrap());
    pump_until(&mut viewer, |v| shown(v) == [0, 1] && v.is_idle());
    viewer.set_visible_range(1..3);
    pump_until(&mut viewer, |v| shown(v) == [1, 2] && v.is_idle());
    viewer.set_visible_range(1..4);
    pump_until(&mut viewer, |v| shown(v) == [1, 2, 3] && v.is_idle());

    // Page 1 is the least recently rendered, so rendering page 0 evicts it
    // while it is still on screen.
    viewer.set_visible_range(0..3);
    let events = pump_until(&mut viewer, |v| shown(v) == [0, 1, 2] && v.is_idle());

    assert!(events.contains(&ViewerEvent::PageReady(1)));
    let stats = viewer.stats();
    assert_eq!(stats.cached_pages, 3);
    assert!(stats.cached_bytes <= stats.capacity_bytes);
}

#[test]
fn corrupt_page_is_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    let path = write_document(dir.path(), "doc", 4);
    let mut viewer = open_viewer(
        &dir,
        MemoryBackend::new().failing_on(2),
        Arc::new(ScriptedTransport::new()),
        &small_pages(8, 0),
    );

    viewer.set_visible_range(1..4);
    viewer.load(path.to_str().unwrap());
    let events = pump_until(&mut viewer, |v| v.page_count().is_some() && v.is_idle());

    assert!(events.iter().any(|e| matches!(e, ViewerEvent::PageFailed { page: 2, .. })));
    assert!(viewer.page(1).is_some());
    assert!(viewer.page(2).is_none());
    assert!(viewer.page(3).is_some());

    // Retrying the whole document gives the page another chance.
    viewer.retry();
    assert!(viewer.page_error(2).is_none());
    assert_eq!(viewer.phase(), SessionPhase::Resolving);
}

#[test]
fn zoomed_pan_scrolls_list_until_it_hits_the_end() {
    let dir = TempDir::new().unwrap();
    let mut viewer = open_viewer(
        &dir,
        MemoryBackend::new(),
        Arc::new(ScriptedTransport::new()),
        &small_pages(1, 0),
    );

    let _ = viewer.handle_gesture(GestureEvent::PanZoom {
        pan: Offset::ZERO,
        zoom: 2.0,
    });
    viewer.set_list_bounds(ListBounds::FREE);
    let scrolled = viewer.handle_gesture(GestureEvent::PanZoom {
        pan: Offset::new(0.0, -80.0),
        zoom: 1.0,
    });
    assert_eq!(scrolled, 40.0);
    assert_eq!(viewer.transform().offset, Offset::ZERO);

    viewer.set_list_bounds(ListBounds {
        can_scroll_backward: true,
        can_scroll_forward: false,
    });
    let scrolled = viewer.handle_gesture(GestureEvent::PanZoom {
        pan: Offset::new(0.0, -80.0),
        zoom: 1.0,
    });
    assert_eq!(scrolled, 0.0);
    assert_eq!(viewer.transform().offset, Offset::new(0.0, -80.0));
}
