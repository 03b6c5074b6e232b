//! Resolving document references to local files
//!
//! Remote documents are downloaded once into a shared cache directory and
//! reused afterwards. Files are named by the SHA-256 of their URL, so the
//! same URL always maps to the same cache entry.

mod cache;
mod error;
mod state;
mod transport;

pub use cache::{DocumentRef, DownloadCache, cache_key};
pub use error::DownloadError;
pub use state::DownloadState;
pub use transport::{HttpResponse, Transport, UreqTransport};
