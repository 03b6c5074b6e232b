//! Progress of one document-reference load attempt

use std::path::{Path, PathBuf};

use super::DownloadError;

/// Lifecycle of a single resolve attempt
///
/// A new value is created per attempt; the viewer resets it whenever a new
/// reference is loaded or the user retries.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DownloadState {
    #[default]
    Idle,
    /// Fraction of the declared content received so far, in `[0, 1]`
    Downloading { progress: f32 },
    Succeeded(PathBuf),
    Failed(DownloadError),
}

impl DownloadState {
    #[must_use]
    pub fn progress(&self) -> Option<f32> {
        match self {
            Self::Downloading { progress } => Some(*progress),
            Self::Succeeded(_) => Some(1.0),
            Self::Idle | Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }

    #[must_use]
    pub fn local_file(&self) -> Option<&Path> {
        match self {
            Self::Succeeded(path) => Some(path),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&DownloadError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Record a progress report. Reports after completion are ignored.
    pub fn on_progress(&mut self, fraction: f32) {
        if self.is_finished() {
            return;
        }
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        *self = Self::Downloading { progress: fraction };
    }

    pub fn on_finished(&mut self, result: Result<PathBuf, DownloadError>) {
        *self = match result {
            Ok(path) => Self::Succeeded(path),
            Err(err) => Self::Failed(err),
        };
    }

    pub fn reset(&mut self) {
        *self = Self::Idle;
    }
}
