//! Messages exchanged with the session worker and download threads

use std::path::PathBuf;
use std::sync::Arc;

use super::backend::DecodeError;
use super::types::PixelImage;
use crate::download::DownloadError;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Pixel size a page is rasterized at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTarget {
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamp the viewport width into `[min_width, max_width]` and derive the
    /// height from the page aspect ratio (height / width).
    ///
    /// Resolution therefore depends on the configured bounds, not on the
    /// display's pixel density.
    #[must_use]
    pub fn for_viewport(
        viewport_width: f32,
        min_width: u32,
        max_width: u32,
        aspect_ratio: f32,
    ) -> Self {
        let (lo, hi) = if min_width <= max_width {
            (min_width, max_width)
        } else {
            (max_width, min_width)
        };
        let width = if viewport_width.is_finite() {
            (viewport_width.max(0.0) as u32).clamp(lo, hi)
        } else {
            lo
        };
        let height = (width as f32 * aspect_ratio).floor() as u32;
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Failure to render one page
///
/// Local to that page: the slot stays blank and other pages keep rendering.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("decoding backend: {0}")]
    Decode(#[from] DecodeError),

    #[error("render target {width}x{height} is empty")]
    EmptyTarget { width: u32, height: u32 },
}

/// Request sent to the session worker
#[derive(Debug)]
pub enum RenderRequest {
    /// Release the current document and its cached pages, then open `path`
    Open { generation: u64, path: PathBuf },

    /// Render a page for the session `generation`
    Page {
        id: RequestId,
        generation: u64,
        page: usize,
        target: RenderTarget,
    },

    /// Drop every cached page of the current session
    EvictAll { generation: u64 },

    /// Release the current document and its cached pages
    Close,

    /// Shutdown the worker
    Shutdown,
}

/// Result delivered back to the viewer from background threads
///
/// Everything carries the session generation it belongs to so results of a
/// superseded document can be discarded.
#[derive(Debug)]
pub enum SessionEvent {
    DownloadProgress {
        generation: u64,
        fraction: f32,
    },

    Resolved {
        generation: u64,
        result: Result<PathBuf, DownloadError>,
    },

    Opened {
        generation: u64,
        page_count: usize,
    },

    OpenFailed {
        generation: u64,
        error: DecodeError,
    },

    Page {
        id: RequestId,
        generation: u64,
        page: usize,
        data: Arc<PixelImage>,
    },

    Error {
        id: RequestId,
        generation: u64,
        page: usize,
        error: RenderError,
    },

    /// The request targeted a session that is no longer open
    Cancelled { id: RequestId, page: usize },
}

impl SessionEvent {
    #[must_use]
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::DownloadProgress { generation, .. }
            | Self::Resolved { generation, .. }
            | Self::Opened { generation, .. }
            | Self::OpenFailed { generation, .. }
            | Self::Page { generation, .. }
            | Self::Error { generation, .. } => Some(*generation),
            Self::Cancelled { .. } => None,
        }
    }
}
