//! Page rendering infrastructure

mod backend;
mod cache;
#[cfg(feature = "pdf")]
mod mupdf_backend;
mod request;
mod scheduler;
mod service;
mod state;
mod types;
mod worker;
mod zoom;

pub use backend::{DecodeBackend, DecodeError, DocumentHandle, PageHandle};
pub use cache::PageCache;
#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfBackend;
pub use request::{RenderError, RenderRequest, RenderTarget, RequestId, SessionEvent};
pub use scheduler::{RenderScheduler, SchedulerStats};
pub use service::{LoadError, PagedViewer, ViewerEvent};
pub use state::{Command, Effect, SessionPhase, ViewerState};
pub use types::*;
pub use zoom::*;
