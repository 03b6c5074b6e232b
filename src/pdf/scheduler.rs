//! Serialized page rendering on top of the page cache

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, warn};

use super::backend::{DecodeError, DocumentHandle};
use super::cache::PageCache;
use super::request::{RenderError, RenderTarget};
use super::types::PixelImage;

/// Counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub renders: u64,
    pub cache_hits: u64,
    pub cached_pages: usize,
    pub cached_bytes: usize,
    pub capacity_bytes: usize,
}

/// Owns the page cache and the one render lock of the engine
///
/// The cache check and the render that follows a miss happen under a single
/// mutex, so at most one rasterization runs at any time. Concurrent requests
/// for the same page therefore render it once; requests for different pages
/// are serialized too. Relaxing this into a per-page lock table must keep the
/// one-render-per-page guarantee and account for the extra peak memory.
pub struct RenderScheduler {
    cache: Mutex<PageCache>,
    renders: AtomicU64,
    cache_hits: AtomicU64,
}

impl RenderScheduler {
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            cache: Mutex::new(PageCache::new(capacity_bytes)),
            renders: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Return the cached image for `index`, rendering it first on a miss
    ///
    /// Backend failures come back as `RenderError`; the lock is released on
    /// every path, and a panic inside the backend does not poison it for later
    /// callers.
    pub fn ensure_rendered<D>(
        &self,
        index: usize,
        document: &D,
        target: RenderTarget,
    ) -> Result<Arc<PixelImage>, RenderError>
    where
        D: DocumentHandle + ?Sized,
    {
        if target.is_empty() {
            return Err(RenderError::EmptyTarget {
                width: target.width,
                height: target.height,
            });
        }

        let mut cache = self.lock();
        if let Some(image) = cache.get(index) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(image);
        }

        let page_count = document.page_count();
        if index >= page_count {
            return Err(DecodeError::PageOutOfRange { index, page_count }.into());
        }

        let started = Instant::now();
        let image = {
            let page = document.open_page(index)?;
            page.render(target)?
        };
        self.renders.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Rendered page {index} at {}x{} in {:?}",
            image.width(),
            image.height(),
            started.elapsed()
        );

        let image = Arc::new(image);
        let evicted = cache.put(index, Arc::clone(&image));
        if evicted.contains(&index) {
            warn!(
                "Page {index} ({} bytes) exceeds the cache capacity of {} bytes",
                image.byte_size(),
                cache.capacity_bytes()
            );
        } else if !evicted.is_empty() {
            debug!("Evicted pages {evicted:?} to fit page {index}");
        }

        Ok(image)
    }

    /// Cached image for `index`, without rendering or touching recency
    #[must_use]
    pub fn cached(&self, index: usize) -> Option<Arc<PixelImage>> {
        self.lock().peek(index).cloned()
    }

    /// Drop and release every cached page
    ///
    /// Waits for an in-flight render to finish first.
    pub fn evict_all(&self) {
        self.lock().evict_all();
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let cache = self.lock();
        SchedulerStats {
            renders: self.renders.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cached_pages: cache.len(),
            cached_bytes: cache.size_bytes(),
            capacity_bytes: cache.capacity_bytes(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::test_helpers::MemoryDocument;

    const TARGET: RenderTarget = RenderTarget::new(4, 4);

    #[test]
    fn second_request_is_served_from_cache() {
        let scheduler = RenderScheduler::new(1024);
        let doc = MemoryDocument::new(3);

        let first = scheduler.ensure_rendered(1, &doc, TARGET).unwrap();
        let second = scheduler.ensure_rendered(1, &doc, TARGET).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(doc.render_count(), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.renders, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cached_bytes, 64);
    }

    #[test]
    fn concurrent_requests_for_one_page_render_once() {
        let scheduler = RenderScheduler::new(1024);
        let doc = MemoryDocument::new(2).with_render_delay(Duration::from_millis(20));

        let images: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| scheduler.ensure_rendered(0, &doc, TARGET).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(doc.render_count(), 1);
        assert!(images.iter().all(|image| Arc::ptr_eq(image, &images[0])));
    }

    #[test]
    fn renders_never_overlap() {
        let scheduler = RenderScheduler::new(1 << 20);
        let doc = MemoryDocument::new(6).with_render_delay(Duration::from_millis(5));

        std::thread::scope(|s| {
            for page in 0..6 {
                let scheduler = &scheduler;
                let doc = &doc;
                s.spawn(move || scheduler.ensure_rendered(page, doc, TARGET).unwrap());
            }
        });

        assert_eq!(doc.render_count(), 6);
        assert_eq!(doc.max_concurrent_renders(), 1);
    }

    #[test]
    fn failing_page_does_not_block_others() {
        let scheduler = RenderScheduler::new(1024);
        let doc = MemoryDocument::new(3).failing_on(1);

        let err = scheduler.ensure_rendered(1, &doc, TARGET).unwrap_err();
        assert!(matches!(err, RenderError::Decode(DecodeError::Generic { .. })));

        assert!(scheduler.ensure_rendered(2, &doc, TARGET).is_ok());
        assert!(scheduler.cached(1).is_none());
        assert!(scheduler.cached(2).is_some());
    }

    #[test]
    fn out_of_range_and_empty_target_are_errors() {
        let scheduler = RenderScheduler::new(1024);
        let doc = MemoryDocument::new(2);

        assert_eq!(
            scheduler.ensure_rendered(5, &doc, TARGET).unwrap_err(),
            RenderError::Decode(DecodeError::PageOutOfRange {
                index: 5,
                page_count: 2
            })
        );
        assert_eq!(
            scheduler
                .ensure_rendered(0, &doc, RenderTarget::new(0, 10))
                .unwrap_err(),
            RenderError::EmptyTarget {
                width: 0,
                height: 10
            }
        );
        assert_eq!(doc.render_count(), 0);
    }

    #[test]
    fn evict_all_releases_cached_pages() {
        let scheduler = RenderScheduler::new(1024);
        let doc = MemoryDocument::new(2);
        let image = scheduler.ensure_rendered(0, &doc, TARGET).unwrap();

        scheduler.evict_all();

        assert!(image.is_released());
        assert_eq!(scheduler.stats().cached_pages, 0);
        scheduler.ensure_rendered(0, &doc, TARGET).unwrap();
        assert_eq!(doc.render_count(), 2);
    }
}
