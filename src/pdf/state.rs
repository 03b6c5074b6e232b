//! Viewer session state

use std::ops::Range;
use std::path::PathBuf;

use super::request::RenderTarget;
use super::types::BYTES_PER_PIXEL;
use super::zoom::{ListBounds, ViewportSize};
use crate::settings::ViewerSettings;

/// Where the current document reference is in its load lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No document loaded
    #[default]
    Idle,
    /// Waiting for the reference to resolve to a local file
    Resolving,
    /// Waiting for the backend to open the file
    Opening,
    Ready {
        page_count: usize,
    },
    /// Resolve or open failed; a retry starts over
    Failed,
}

/// Foreground state of a [`super::PagedViewer`]
///
/// Pure: commands mutate it and return the effects the viewer must carry out.
#[derive(Clone, Debug)]
pub struct ViewerState {
    reference: Option<String>,
    generation: u64,
    phase: SessionPhase,
    viewport: ViewportSize,
    visible: Range<usize>,
    list_bounds: ListBounds,
    prefetch_radius: usize,
    cache_capacity_bytes: usize,
    min_page_width: u32,
    max_page_width: u32,
    page_aspect_ratio: f32,
}

impl ViewerState {
    #[must_use]
    pub fn new(settings: &ViewerSettings) -> Self {
        Self {
            reference: None,
            generation: 0,
            phase: SessionPhase::Idle,
            viewport: ViewportSize::new(0.0, 0.0),
            visible: 0..0,
            list_bounds: ListBounds::default(),
            prefetch_radius: settings.prefetch_radius,
            cache_capacity_bytes: settings.memory_cache_byte_count,
            min_page_width: settings.min_page_width,
            max_page_width: settings.max_page_width,
            page_aspect_ratio: settings.page_aspect_ratio,
        }
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Load(reference) => self.start_session(reference),

            Command::Retry => match self.reference.clone() {
                Some(reference) => self.start_session(reference),
                None => vec![],
            },

            Command::Resolved { generation, path } => {
                if !self.is_current(generation) || self.phase != SessionPhase::Resolving {
                    return vec![];
                }
                self.phase = SessionPhase::Opening;
                vec![Effect::OpenDocument { generation, path }]
            }

            Command::ResolveFailed { generation } => {
                if !self.is_current(generation) || self.phase != SessionPhase::Resolving {
                    return vec![];
                }
                self.phase = SessionPhase::Failed;
                vec![]
            }

            Command::DocumentOpened {
                generation,
                page_count,
            } => {
                if !self.is_current(generation) || self.phase != SessionPhase::Opening {
                    return vec![];
                }
                self.phase = SessionPhase::Ready { page_count };
                self.wanted_pages()
            }

            Command::OpenFailed { generation } => {
                if !self.is_current(generation) || self.phase != SessionPhase::Opening {
                    return vec![];
                }
                self.phase = SessionPhase::Failed;
                vec![Effect::CloseDocument]
            }

            Command::SetViewport(viewport) => {
                if self.viewport == viewport {
                    return vec![];
                }
                let old_target = self.render_target();
                self.viewport = viewport;

                let mut effects = vec![Effect::ReclampTransform];
                if self.render_target() != old_target && self.page_count().is_some() {
                    effects.push(Effect::InvalidateCache);
                    effects.push(Effect::ClearPublished);
                    effects.extend(self.wanted_pages());
                }
                effects
            }

            Command::SetVisibleRange(range) => {
                let range = range.start..range.end.max(range.start);
                if self.visible == range {
                    return vec![];
                }
                self.visible = range;
                if self.page_count().is_none() {
                    return vec![];
                }
                let mut effects = vec![Effect::PrunePublished];
                effects.extend(self.wanted_pages());
                effects
            }

            Command::SetScrollBounds(bounds) => {
                self.list_bounds = bounds;
                vec![]
            }

            Command::Close => {
                if self.reference.is_none() && self.phase == SessionPhase::Idle {
                    return vec![];
                }
                self.reference = None;
                self.generation += 1;
                self.phase = SessionPhase::Idle;
                vec![Effect::CloseDocument, Effect::ClearPublished]
            }
        }
    }

    fn start_session(&mut self, reference: String) -> Vec<Effect> {
        self.generation += 1;
        self.phase = SessionPhase::Resolving;
        self.reference = Some(reference.clone());
        vec![
            Effect::CloseDocument,
            Effect::ClearPublished,
            Effect::StartDownload {
                generation: self.generation,
                reference,
            },
        ]
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Render effects for the visible pages followed by the prefetch ring
    ///
    /// The ring only takes the cache room left over by the visible pages,
    /// so a prefetch never evicts a page on screen.
    fn wanted_pages(&self) -> Vec<Effect> {
        let Some(page_count) = self.page_count() else {
            return vec![];
        };
        let visible = self.visible_pages();
        let mut effects: Vec<Effect> = visible.clone().map(Effect::RenderPage).collect();

        if visible.is_empty() {
            return effects;
        }
        let mut budget = self.pages_in_cache().saturating_sub(visible.len());
        for distance in 1..=self.prefetch_radius {
            let after = visible.end - 1 + distance;
            let before = visible.start.checked_sub(distance);
            for page in [Some(after).filter(|p| *p < page_count), before]
                .into_iter()
                .flatten()
            {
                if budget == 0 {
                    return effects;
                }
                budget -= 1;
                effects.push(Effect::PrefetchPage(page));
            }
        }
        effects
    }

    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Identifier of the current load attempt, bumped by every load, retry
    /// and close
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn page_count(&self) -> Option<usize> {
        match self.phase {
            SessionPhase::Ready { page_count } => Some(page_count),
            _ => None,
        }
    }

    #[must_use]
    pub fn viewport(&self) -> ViewportSize {
        self.viewport
    }

    #[must_use]
    pub fn list_bounds(&self) -> ListBounds {
        self.list_bounds
    }

    /// The requested visible range, as last set by the caller
    #[must_use]
    pub fn visible_range(&self) -> Range<usize> {
        self.visible.clone()
    }

    /// Visible range limited to the pages the document has
    #[must_use]
    pub fn visible_pages(&self) -> Range<usize> {
        let count = self.page_count().unwrap_or(0);
        self.visible.start.min(count)..self.visible.end.min(count)
    }

    #[must_use]
    pub fn prefetch_radius(&self) -> usize {
        self.prefetch_radius
    }

    /// How many pages at the current render target fit in the page cache
    #[must_use]
    pub fn pages_in_cache(&self) -> usize {
        let target = self.render_target();
        let page_bytes = target.width as usize * target.height as usize * BYTES_PER_PIXEL;
        self.cache_capacity_bytes.checked_div(page_bytes).unwrap_or(0)
    }

    /// Whether every visible page can be cached at once
    #[must_use]
    pub fn visible_fits_cache(&self) -> bool {
        self.visible_pages().len() <= self.pages_in_cache()
    }

    /// Pixel size pages are rendered at for the current viewport
    #[must_use]
    pub fn render_target(&self) -> RenderTarget {
        RenderTarget::for_viewport(
            self.viewport.width,
            self.min_page_width,
            self.max_page_width,
            self.page_aspect_ratio,
        )
    }
}

/// Commands that modify viewer state
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Start a new session for a document reference
    Load(String),
    /// Start over with the current reference
    Retry,
    /// The reference resolved to a local file
    Resolved { generation: u64, path: PathBuf },
    ResolveFailed { generation: u64 },
    DocumentOpened { generation: u64, page_count: usize },
    OpenFailed { generation: u64 },
    SetViewport(ViewportSize),
    SetVisibleRange(Range<usize>),
    /// Whether the page list can still scroll in each direction
    SetScrollBounds(ListBounds),
    /// End the session and release the document
    Close,
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Release the current document handle and its cached pages
    CloseDocument,
    /// Forget every published page
    ClearPublished,
    /// Resolve `reference` in the background
    StartDownload { generation: u64, reference: String },
    OpenDocument { generation: u64, path: PathBuf },
    /// Drop cached pages rendered at a stale target size
    InvalidateCache,
    /// Render a visible page and publish it
    RenderPage(usize),
    /// Render a page near the visible range into the cache only
    PrefetchPage(usize),
    /// Forget published pages that left the visible range
    PrunePublished,
    /// Bring the transform back inside the bounds of the new viewport
    ReclampTransform,
}
