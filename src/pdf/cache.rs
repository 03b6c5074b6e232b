//! Byte-bounded LRU cache of rendered pages

use std::sync::Arc;

use log::debug;
use lru::LruCache;

use super::types::PixelImage;

/// LRU cache mapping page index to its rendered image
///
/// Capacity is in bytes, not entries. Both reads and writes refresh recency.
/// Every image leaving the cache (capacity pressure, replacement or
/// `evict_all`) is released before the call returns.
pub struct PageCache {
    entries: LruCache<usize, Arc<PixelImage>>,
    capacity_bytes: usize,
    size_bytes: usize,
}

impl PageCache {
    /// Create an empty cache holding at most `capacity_bytes` of pixels
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity_bytes,
            size_bytes: 0,
        }
    }

    /// Bytes an image accounts for
    #[must_use]
    pub fn size_of(image: &PixelImage) -> usize {
        image.byte_size()
    }

    /// Get a cached page, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, index: usize) -> Option<Arc<PixelImage>> {
        self.entries.get(&index).cloned()
    }

    /// Look at a cached page without promoting it
    #[must_use]
    pub fn peek(&self, index: usize) -> Option<&Arc<PixelImage>> {
        self.entries.peek(&index)
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains(&index)
    }

    /// Insert or replace a page, then evict least recently used pages until
    /// the cache fits its capacity again. Returns the evicted indices, oldest
    /// first.
    ///
    /// An image bigger than the whole capacity is evicted right away, same as
    /// any other entry that does not fit.
    pub fn put(&mut self, index: usize, image: Arc<PixelImage>) -> Vec<usize> {
        self.size_bytes += Self::size_of(&image);
        let incoming = Arc::clone(&image);

        if let Some(old) = self.entries.put(index, image) {
            self.size_bytes -= Self::size_of(&old);
            if !Arc::ptr_eq(&old, &incoming) {
                Self::release(index, &old);
            }
        }

        self.trim_to_capacity()
    }

    /// Drop every page, releasing all images
    pub fn evict_all(&mut self) {
        let count = self.entries.len();
        while let Some((index, image)) = self.entries.pop_lru() {
            Self::release(index, &image);
        }
        self.size_bytes = 0;
        if count > 0 {
            debug!("Evicted all {count} cached pages");
        }
    }

    fn trim_to_capacity(&mut self) -> Vec<usize> {
        let mut evicted = Vec::new();
        while self.size_bytes > self.capacity_bytes {
            let Some((index, image)) = self.entries.pop_lru() else {
                break;
            };
            self.size_bytes -= Self::size_of(&image);
            Self::release(index, &image);
            evicted.push(index);
        }
        evicted
    }

    fn release(index: usize, image: &PixelImage) {
        if image.release() {
            debug!("Released page {index} ({} bytes)", image.byte_size());
        }
    }

    /// Cached indices from least to most recently used
    #[must_use]
    pub fn keys(&self) -> Vec<usize> {
        self.entries.iter().rev().map(|(index, _)| *index).collect()
    }

    /// Number of cached pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes of cached images
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }
}
