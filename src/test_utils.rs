pub mod test_helpers {
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::io::{self, Cursor, Read};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use crate::download::{DownloadError, HttpResponse, Transport};
    use crate::pdf::{
        DecodeBackend, DecodeError, DocumentHandle, PageHandle, PixelImage, RenderTarget,
    };

    /// Canned reply for one URL of a [`ScriptedTransport`]
    #[derive(Clone, Debug)]
    pub struct ScriptedResponse {
        status: u16,
        content_length: Option<u64>,
        body: Vec<u8>,
        fail_after: Option<usize>,
        delay: Duration,
        trickle: Option<(usize, Duration)>,
    }

    impl ScriptedResponse {
        /// 200 with `body` and a matching content length
        pub fn ok(body: impl Into<Vec<u8>>) -> Self {
            let body = body.into();
            Self {
                status: 200,
                content_length: Some(body.len() as u64),
                body,
                fail_after: None,
                delay: Duration::ZERO,
                trickle: None,
            }
        }

        /// Bare status code with no body
        pub fn status(code: u16) -> Self {
            Self {
                status: code,
                content_length: None,
                body: Vec::new(),
                fail_after: None,
                delay: Duration::ZERO,
                trickle: None,
            }
        }

        /// Drop the content length header
        pub fn without_length(mut self) -> Self {
            self.content_length = None;
            self
        }

        /// Announce a different content length than the body has
        pub fn declared_length(mut self, length: u64) -> Self {
            self.content_length = Some(length);
            self
        }

        /// Reset the connection after `bytes` bytes of body
        pub fn failing_after(mut self, bytes: usize) -> Self {
            self.fail_after = Some(bytes);
            self
        }

        /// Sleep before answering
        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Deliver the body `chunk` bytes at a time, pausing `interval`
        /// before each chunk
        pub fn trickled(mut self, chunk: usize, interval: Duration) -> Self {
            self.trickle = Some((chunk.max(1), interval));
            self
        }

        fn into_response(self) -> HttpResponse {
            let body: Box<dyn Read + Send> = match (self.fail_after, self.trickle) {
                (Some(limit), _) => {
                    let mut body = self.body;
                    body.truncate(limit);
                    Box::new(Cursor::new(body).chain(ResetReader))
                }
                (None, Some((chunk, interval))) => Box::new(TrickleReader {
                    body: Cursor::new(self.body),
                    chunk,
                    interval,
                }),
                (None, None) => Box::new(Cursor::new(self.body)),
            };
            HttpResponse {
                status: self.status,
                content_length: self.content_length,
                body,
            }
        }
    }

    struct TrickleReader {
        body: Cursor<Vec<u8>>,
        chunk: usize,
        interval: Duration,
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(self.interval);
            let len = buf.len().min(self.chunk);
            self.body.read(&mut buf[..len])
        }
    }

    struct ResetReader;

    impl Read for ResetReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
        }
    }

    /// In-memory HTTP transport answering from a URL table
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<HashMap<String, ScriptedResponse>>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer every later request for `url` with `response`
        pub fn respond(&self, url: &str, response: ScriptedResponse) {
            self.responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(url.to_string(), response);
        }

        /// Number of requests made for `url`
        pub fn calls(&self, url: &str) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(url)
                .copied()
                .unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .sum()
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, url: &str) -> Result<HttpResponse, DownloadError> {
            *self
                .calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(url.to_string())
                .or_default() += 1;

            let response = self
                .responses
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(url)
                .cloned();
            let Some(response) = response else {
                return Err(DownloadError::network(format!("no route to {url}")));
            };
            if !response.delay.is_zero() {
                std::thread::sleep(response.delay);
            }
            Ok(response.into_response())
        }
    }

    /// Sorted entries of a directory
    pub fn list_dir(dir: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok().map(|e| e.path())).collect())
            .unwrap_or_default();
        entries.sort();
        entries
    }

    /// Counters shared by every document a [`MemoryBackend`] opens
    #[derive(Debug, Default)]
    pub struct RenderProbe {
        renders: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        opened: AtomicUsize,
        closed: AtomicUsize,
        rendered_pages: Mutex<Vec<usize>>,
    }

    impl RenderProbe {
        pub fn render_count(&self) -> usize {
            self.renders.load(Ordering::SeqCst)
        }

        /// Highest number of renders observed running at once
        pub fn max_concurrent_renders(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }

        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        /// Documents opened and not yet dropped
        pub fn open_documents(&self) -> usize {
            self.opened() - self.closed()
        }

        /// Page indices in the order they were rasterized
        pub fn rendered_pages(&self) -> Vec<usize> {
            self.rendered_pages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    /// Document whose pages render as solid colors
    ///
    /// Page `n` is filled with `[n, 0, 0, 255]` (wrapping) so tests can tell
    /// pages apart.
    pub struct MemoryDocument {
        page_count: usize,
        render_delay: Duration,
        failing: HashSet<usize>,
        probe: Arc<RenderProbe>,
    }

    impl MemoryDocument {
        pub fn new(page_count: usize) -> Self {
            Self::with_probe(page_count, Arc::new(RenderProbe::default()))
        }

        fn with_probe(page_count: usize, probe: Arc<RenderProbe>) -> Self {
            probe.opened.fetch_add(1, Ordering::SeqCst);
            Self {
                page_count,
                render_delay: Duration::ZERO,
                failing: HashSet::new(),
                probe,
            }
        }

        pub fn with_render_delay(mut self, delay: Duration) -> Self {
            self.render_delay = delay;
            self
        }

        /// Make rendering page `index` fail
        pub fn failing_on(mut self, index: usize) -> Self {
            self.failing.insert(index);
            self
        }

        pub fn render_count(&self) -> usize {
            self.probe.render_count()
        }

        pub fn max_concurrent_renders(&self) -> usize {
            self.probe.max_concurrent_renders()
        }

        pub fn probe(&self) -> Arc<RenderProbe> {
            Arc::clone(&self.probe)
        }
    }

    impl Drop for MemoryDocument {
        fn drop(&mut self) {
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DocumentHandle for MemoryDocument {
        fn page_count(&self) -> usize {
            self.page_count
        }

        fn open_page(&self, index: usize) -> Result<Box<dyn PageHandle + '_>, DecodeError> {
            if index >= self.page_count {
                return Err(DecodeError::PageOutOfRange {
                    index,
                    page_count: self.page_count,
                });
            }
            Ok(Box::new(MemoryPage {
                document: self,
                index,
            }))
        }
    }

    struct MemoryPage<'a> {
        document: &'a MemoryDocument,
        index: usize,
    }

    impl PageHandle for MemoryPage<'_> {
        fn render(&self, target: RenderTarget) -> Result<PixelImage, DecodeError> {
            let probe = &self.document.probe;
            let active = probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_active.fetch_max(active, Ordering::SeqCst);

            if !self.document.render_delay.is_zero() {
                std::thread::sleep(self.document.render_delay);
            }

            let result = if self.document.failing.contains(&self.index) {
                Err(DecodeError::generic(format!(
                    "page {} is corrupt",
                    self.index
                )))
            } else {
                probe.renders.fetch_add(1, Ordering::SeqCst);
                probe
                    .rendered_pages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(self.index);
                PixelImage::filled(target.width, target.height, page_color(self.index))
            };

            probe.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Fill color of page `index` in a [`MemoryDocument`]
    pub fn page_color(index: usize) -> [u8; 4] {
        [(index % 256) as u8, 0, 0, 255]
    }

    const DOCUMENT_MAGIC: &str = "%MEMDOC pages=";

    /// Write a file a [`MemoryBackend`] can open
    pub fn write_document(dir: &Path, name: &str, page_count: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, document_bytes(page_count)).unwrap();
        path
    }

    /// File contents of a [`MemoryBackend`] document
    pub fn document_bytes(page_count: usize) -> Vec<u8> {
        format!("{DOCUMENT_MAGIC}{page_count}\n").into_bytes()
    }

    /// Decoding backend over tiny text files written by [`write_document`]
    pub struct MemoryBackend {
        render_delay: Duration,
        failing: HashSet<usize>,
        probe: Arc<RenderProbe>,
    }

    impl MemoryBackend {
        pub fn new() -> Self {
            Self {
                render_delay: Duration::ZERO,
                failing: HashSet::new(),
                probe: Arc::new(RenderProbe::default()),
            }
        }

        pub fn with_render_delay(mut self, delay: Duration) -> Self {
            self.render_delay = delay;
            self
        }

        /// Make page `index` fail to render in every opened document
        pub fn failing_on(mut self, index: usize) -> Self {
            self.failing.insert(index);
            self
        }

        pub fn probe(&self) -> Arc<RenderProbe> {
            Arc::clone(&self.probe)
        }
    }

    impl Default for MemoryBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DecodeBackend for MemoryBackend {
        fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, DecodeError> {
            let content =
                fs::read_to_string(path).map_err(|e| DecodeError::open(path, e.to_string()))?;
            let page_count = content
                .trim()
                .strip_prefix(DOCUMENT_MAGIC)
                .and_then(|count| count.parse::<usize>().ok())
                .ok_or_else(|| DecodeError::open(path, "not a document"))?;

            let mut document = MemoryDocument::with_probe(page_count, Arc::clone(&self.probe))
                .with_render_delay(self.render_delay);
            document.failing = self.failing.clone();
            Ok(Box::new(document))
        }
    }
}
