//! Paginated document viewing engine
//!
//! Resolves a document reference to a local file (downloading and caching
//! remote ones), renders the visible pages through a byte-bounded page cache
//! with one render at a time, and turns zoom/pan gestures into a clamped
//! viewport transform.

pub mod download;
pub mod panic_handler;
pub mod pdf;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use download::{DownloadCache, DownloadError, DownloadState};
pub use pdf::{PagedViewer, ViewerEvent};
pub use settings::ViewerSettings;
