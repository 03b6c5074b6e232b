//! Core types for page rendering

use std::sync::{PoisonError, RwLock};

use super::backend::DecodeError;

/// RGBA, one byte per channel
pub const BYTES_PER_PIXEL: usize = 4;

/// A rasterized page.
///
/// The pixel buffer can be released explicitly while `Arc` clones of the
/// image are still around; the cache does this on eviction so peak memory
/// does not depend on when the display layer drops its references.
/// Readers of a released image see no pixels.
pub struct PixelImage {
    width: u32,
    height: u32,
    byte_size: usize,
    pixels: RwLock<Option<Vec<u8>>>,
}

impl PixelImage {
    /// Wrap an RGBA buffer of exactly `width * height * 4` bytes
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = Self::buffer_len(width, height)?;
        if pixels.len() != expected {
            return Err(DecodeError::generic(format!(
                "pixel buffer is {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            byte_size: expected,
            pixels: RwLock::new(Some(pixels)),
        })
    }

    /// Allocate an image filled with one color
    ///
    /// Allocation failure is reported instead of aborting the process.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, DecodeError> {
        let len = Self::buffer_len(width, height)?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(len)
            .map_err(|_| DecodeError::OutOfMemory { bytes: len })?;
        for _ in 0..len / BYTES_PER_PIXEL {
            pixels.extend_from_slice(&rgba);
        }
        Self::from_rgba(width, height, pixels)
    }

    fn buffer_len(width: u32, height: u32) -> Result<usize, DecodeError> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
            .ok_or(DecodeError::OutOfMemory { bytes: usize::MAX })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of the pixel buffer as allocated, unaffected by `release`
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.pixels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Free the pixel buffer now. Returns false if it was already released.
    pub fn release(&self) -> bool {
        self.pixels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Run `f` over the pixels, or return `None` if the image was released
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let guard = self.pixels.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_deref().map(f)
    }

    /// Copy of the pixels, if still available
    #[must_use]
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        self.with_pixels(<[u8]>::to_vec)
    }
}

impl std::fmt::Debug for PixelImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("byte_size", &self.byte_size)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_image_has_expected_size() {
        let image = PixelImage::filled(3, 2, [255, 255, 255, 255]).unwrap();
        assert_eq!(image.byte_size(), 24);
        assert_eq!(image.with_pixels(<[u8]>::len), Some(24));
        assert_eq!(image.to_vec().unwrap()[..4], [255, 255, 255, 255]);
    }

    #[test]
    fn from_rgba_rejects_wrong_length() {
        let err = PixelImage::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, DecodeError::Generic { .. }));
    }

    #[test]
    fn release_drops_pixels_but_keeps_size() {
        let image = PixelImage::filled(4, 4, [0, 0, 0, 255]).unwrap();
        assert!(image.release());
        assert!(!image.release());
        assert!(image.is_released());
        assert_eq!(image.to_vec(), None);
        assert_eq!(image.byte_size(), 64);
    }
}
