//! Content-addressed download cache for remote documents

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::{DownloadError, Transport};

const CACHE_EXTENSION: &str = "pdf";
const TEMP_SUFFIX: &str = ".temp";
const CHUNK_SIZE: usize = 8 * 1024;
/// Live transfers write at least once per read timeout, so a temp file
/// untouched for this long belongs to a dead process.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(10 * 60);

/// A document reference as supplied by the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentRef {
    Local(PathBuf),
    Remote(String),
}

impl DocumentRef {
    /// Surrounding whitespace is ignored when detecting and storing URLs;
    /// anything else is a local path kept exactly as given.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Remote(trimmed.to_string())
        } else if let Some(path) = reference.strip_prefix("file://") {
            Self::Local(PathBuf::from(path))
        } else {
            Self::Local(PathBuf::from(reference))
        }
    }
}

/// Hex SHA-256 of a source identifier, used as the cache file stem
#[must_use]
pub fn cache_key(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// Resolves references to local files, downloading remote ones at most once
///
/// Layout: one directory with `<sha256-of-url>.pdf` entries. Transfers are
/// streamed into a `*.temp` sibling and renamed into place only after the
/// whole body arrived, so a cache entry is either complete or absent.
pub struct DownloadCache {
    dir: PathBuf,
    transport: Arc<dyn Transport>,
    enabled: bool,
}

impl DownloadCache {
    /// Open (creating if needed) a cache directory and sweep stale temp files
    pub fn open(
        dir: impl Into<PathBuf>,
        transport: Arc<dyn Transport>,
        enabled: bool,
    ) -> Result<Self, DownloadError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let cache = Self {
            dir,
            transport,
            enabled,
        };
        let swept = cache.purge_temp_files(STALE_TEMP_AGE);
        if swept > 0 {
            info!(
                "Removed {swept} interrupted download(s) from {:?}",
                cache.dir
            );
        }
        Ok(cache)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Where the cache entry for `source` lives (whether or not it exists)
    #[must_use]
    pub fn cached_path(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{CACHE_EXTENSION}", cache_key(source)))
    }

    /// Resolve a reference to a readable local file
    ///
    /// Local paths are returned as-is after an existence check. URLs are
    /// served from the cache when present; otherwise they are downloaded,
    /// reporting `received / content_length` after every chunk.
    pub fn resolve<F>(&self, reference: &str, on_progress: F) -> Result<PathBuf, DownloadError>
    where
        F: FnMut(f32),
    {
        match DocumentRef::parse(reference) {
            DocumentRef::Local(path) => {
                if path.exists() {
                    Ok(path)
                } else {
                    Err(DownloadError::NotFound(path))
                }
            }
            DocumentRef::Remote(url) => {
                let target = self.cached_path(&url);
                if self.enabled && target.is_file() {
                    debug!("Download cache hit for {url} at {target:?}");
                    return Ok(target);
                }
                self.download(&url, &target, on_progress)
            }
        }
    }

    fn download<F>(
        &self,
        url: &str,
        target: &Path,
        mut on_progress: F,
    ) -> Result<PathBuf, DownloadError>
    where
        F: FnMut(f32),
    {
        info!("Downloading {url}");
        on_progress(0.0);

        let response = self.transport.get(url)?;
        if !response.is_success() {
            warn!("Download of {url} failed with HTTP {}", response.status);
            return Err(DownloadError::HttpStatus(response.status));
        }
        let content_length = match response.content_length {
            Some(len) if len > 0 => len,
            _ => return Err(DownloadError::EmptyBody),
        };

        let mut temp = self.temp_file(target)?;
        let mut body = response.body;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;

        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DownloadError::network(e.to_string())),
            };
            temp.write_all(&buf[..n])?;
            received += n as u64;
            on_progress((received as f64 / content_length as f64).min(1.0) as f32);
        }

        if received < content_length {
            return Err(DownloadError::network(format!(
                "connection closed after {received} of {content_length} bytes"
            )));
        }

        Self::promote(temp, target)?;
        info!("Downloaded {url} ({received} bytes) to {target:?}");
        Ok(target.to_path_buf())
    }

    /// Copy an arbitrary byte stream into the cache under `source_id`
    ///
    /// Used for documents that arrive as a stream rather than a URL, such as
    /// content handed over by another application.
    pub fn import<R: Read>(
        &self,
        source_id: &str,
        mut reader: R,
    ) -> Result<PathBuf, DownloadError> {
        let target = self.cached_path(source_id);
        let mut temp = self.temp_file(&target)?;

        let copied = std::io::copy(&mut reader, &mut temp)?;
        if copied == 0 {
            return Err(DownloadError::EmptyBody);
        }

        Self::promote(temp, &target)?;
        debug!("Imported {source_id} ({copied} bytes) to {target:?}");
        Ok(target)
    }

    /// Delete the cache entry for a URL. Returns whether a file was removed.
    pub fn evict(&self, source: &str) -> Result<bool, DownloadError> {
        let target = self.cached_path(source);
        match fs::remove_file(&target) {
            Ok(()) => {
                debug!("Evicted {target:?}");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `*.temp` leftovers last modified at least `min_age` ago
    ///
    /// Younger temp files may belong to a transfer still running in another
    /// cache instance over the same directory and are left alone.
    pub fn purge_temp_files(&self, min_age: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(TEMP_SUFFIX));
            if !is_temp {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            // A modification time in the future counts as fresh.
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if metadata.is_file() && age >= min_age {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale temp file {path:?}: {e}"),
                }
            }
        }
        removed
    }

    fn temp_file(&self, target: &Path) -> Result<NamedTempFile, DownloadError> {
        let stem = target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("download");
        let temp = tempfile::Builder::new()
            .prefix(&format!("{stem}."))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)?;
        Ok(temp)
    }

    // An unpromoted NamedTempFile deletes itself on drop, which covers every
    // early return above.
    fn promote(mut temp: NamedTempFile, target: &Path) -> Result<(), DownloadError> {
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(target).map_err(|e| DownloadError::from(e.error))?;
        Ok(())
    }
}

impl std::fmt::Debug for DownloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCache")
            .field("dir", &self.dir)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
