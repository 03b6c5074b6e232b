//! MuPDF decoding backend

use std::path::Path;

use mupdf::{Colorspace, Document, Matrix, Page, Pixmap};

use super::backend::{DecodeBackend, DecodeError, DocumentHandle, PageHandle};
use super::request::RenderTarget;
use super::types::{BYTES_PER_PIXEL, PixelImage};

const PAPER_WHITE: u8 = 255;

impl From<mupdf::error::Error> for DecodeError {
    fn from(err: mupdf::error::Error) -> Self {
        Self::generic(format!("PDF engine: {err}"))
    }
}

/// Opens PDF (and other MuPDF-supported) files
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfBackend;

impl DecodeBackend for MupdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn DocumentHandle>, DecodeError> {
        let doc = Document::open(path.to_string_lossy().as_ref())
            .map_err(|e| DecodeError::open(path, e.to_string()))?;
        let page_count = doc
            .page_count()
            .map_err(|e| DecodeError::open(path, e.to_string()))?;
        let page_count = usize::try_from(page_count)
            .map_err(|_| DecodeError::open(path, "negative page count"))?;

        Ok(Box::new(MupdfDocument { doc, page_count }))
    }
}

struct MupdfDocument {
    doc: Document,
    page_count: usize,
}

impl DocumentHandle for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn open_page(&self, index: usize) -> Result<Box<dyn PageHandle + '_>, DecodeError> {
        let number = i32::try_from(index)
            .ok()
            .filter(|_| index < self.page_count)
            .ok_or(DecodeError::PageOutOfRange {
                index,
                page_count: self.page_count,
            })?;
        Ok(Box::new(MupdfPage {
            page: self.doc.load_page(number)?,
        }))
    }
}

struct MupdfPage {
    page: Page,
}

impl PageHandle for MupdfPage {
    /// Rasterize stretched to exactly the target size on a white background
    fn render(&self, target: RenderTarget) -> Result<PixelImage, DecodeError> {
        let bounds = self.page.bounds()?;
        let page_width = bounds.x1 - bounds.x0;
        let page_height = bounds.y1 - bounds.y0;
        if page_width <= 0.0 || page_height <= 0.0 {
            return Err(DecodeError::generic(format!(
                "page has empty bounds {page_width}x{page_height}"
            )));
        }

        let transform = Matrix::new_scale(
            target.width as f32 / page_width,
            target.height as f32 / page_height,
        );
        let pixmap = self
            .page
            .to_pixmap(&transform, &Colorspace::device_rgb(), false, false)?;

        let pixels = blit_rgba(&pixmap, target)?;
        PixelImage::from_rgba(target.width, target.height, pixels)
    }
}

/// Copy an RGB(A) pixmap into an RGBA buffer of exactly `target` size,
/// padding with white where the pixmap came out a pixel short
fn blit_rgba(pixmap: &Pixmap, target: RenderTarget) -> Result<Vec<u8>, DecodeError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(DecodeError::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let src_width = pixmap.width() as usize;
    let src_height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    if samples.len() < stride.saturating_mul(src_height) || src_width * n > stride {
        return Err(DecodeError::generic("Pixmap buffer size mismatch"));
    }

    let width = target.width as usize;
    let height = target.height as usize;
    let bytes = width * height * BYTES_PER_PIXEL;
    let mut out = Vec::new();
    out.try_reserve_exact(bytes)
        .map_err(|_| DecodeError::OutOfMemory { bytes })?;
    out.resize(bytes, PAPER_WHITE);

    for y in 0..height.min(src_height) {
        let src_row = &samples[y * stride..y * stride + src_width * n];
        let dst_row = &mut out[y * width * BYTES_PER_PIXEL..(y + 1) * width * BYTES_PER_PIXEL];
        for (dst, src) in dst_row
            .chunks_exact_mut(BYTES_PER_PIXEL)
            .zip(src_row.chunks_exact(n))
        {
            dst[..3].copy_from_slice(&src[..3]);
        }
    }

    Ok(out)
}
