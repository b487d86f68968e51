//! Render size computation
//!
//! Callers ask for a page at a target width and a zoom factor. The pixel width
//! handed to the decoder is the target width scaled by the zoom, and the height
//! follows the page's own aspect ratio.

use crate::source::{PageSize, SourceError, SourceResult};

/// Output dimensions for a single page render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// Compute the render size for a page shown `target_width` pixels wide at
    /// `zoom`.
    pub fn for_page(page: PageSize, target_width: u32, zoom: f32) -> SourceResult<Self> {
        if page.width == 0 || page.height == 0 {
            return Err(SourceError::InfoUnavailable);
        }

        let width = scaled_width(target_width, zoom).ok_or_else(|| {
            SourceError::Backend(format!("invalid render width {target_width} at zoom {zoom}"))
        })?;
        let height = (f64::from(width) * f64::from(page.height) / f64::from(page.width)).round();

        Ok(Self { width, height: (height as u32).max(1) })
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Target width scaled by zoom, rounded to whole pixels.
///
/// Returns `None` for a zero width or a zoom that is not a positive finite
/// number.
pub fn scaled_width(target_width: u32, zoom: f32) -> Option<u32> {
    if target_width == 0 || !zoom.is_finite() || zoom <= 0.0 {
        return None;
    }
    let scaled = (f64::from(target_width) * f64::from(zoom)).round();
    Some((scaled.min(f64::from(u32::MAX)) as u32).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_zoom_keeps_target_width() {
        let size = RenderSize::for_page(PageSize::new(1000, 1500), 800, 1.0).unwrap();
        assert_eq!(size, RenderSize { width: 800, height: 1200 });
    }

    #[test]
    fn zoom_scales_both_dimensions() {
        let size = RenderSize::for_page(PageSize::new(1000, 500), 400, 1.5).unwrap();
        assert_eq!(size.width, 600);
        assert_eq!(size.height, 300);
        assert_eq!(size.byte_len(), 600 * 300 * 4);
    }

    #[test]
    fn tiny_renders_never_collapse_to_zero() {
        let size = RenderSize::for_page(PageSize::new(10_000, 10), 1, 0.1).unwrap();
        assert_eq!(size.width, 1);
        assert_eq!(size.height, 1);
    }

    #[test]
    fn rejects_bad_zoom_and_width() {
        assert_eq!(scaled_width(0, 1.0), None);
        assert_eq!(scaled_width(100, 0.0), None);
        assert_eq!(scaled_width(100, -2.0), None);
        assert_eq!(scaled_width(100, f32::NAN), None);
        assert!(RenderSize::for_page(PageSize::new(10, 10), 100, f32::INFINITY).is_err());
    }

    #[test]
    fn rejects_empty_page_info() {
        let err = RenderSize::for_page(PageSize::new(0, 100), 100, 1.0).unwrap_err();
        assert!(matches!(err, SourceError::InfoUnavailable));
    }
}
