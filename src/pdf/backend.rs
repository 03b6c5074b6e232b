//! Decoding backend contract
//!
//! The engine never parses documents itself. A backend opens a file into a
//! [`DocumentHandle`], hands out scoped [`PageHandle`]s and rasterizes them.
//! Handles are released by dropping them.

use std::path::{Path, PathBuf};

use super::request::RenderTarget;
use super::types::PixelImage;

/// Errors reported by a decoding backend
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot open {}: {detail}", path.display())]
    Open { path: PathBuf, detail: String },

    #[error("page {index} out of range, document has {page_count} pages")]
    PageOutOfRange { index: usize, page_count: usize },

    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("{detail}")]
    Generic { detail: String },
}

impl DecodeError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    pub fn open(path: &Path, detail: impl Into<String>) -> Self {
        Self::Open {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// Factory for document handles
///
/// The backend is moved onto the session worker thread, which is the only
/// place documents are opened, so handles themselves need not be `Send`.
pub trait DecodeBackend: Send + 'static {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, DecodeError>;
}

/// An open document
pub trait DocumentHandle {
    fn page_count(&self) -> usize;

    /// Acquire one page. The returned handle must be dropped after rendering.
    fn open_page(&self, index: usize) -> Result<Box<dyn PageHandle + '_>, DecodeError>;
}

/// A page acquired from a [`DocumentHandle`]
pub trait PageHandle {
    fn render(&self, target: RenderTarget) -> Result<PixelImage, DecodeError>;
}
