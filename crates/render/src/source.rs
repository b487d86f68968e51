//! Page decoder contract
//!
//! The decode scheduler never talks to a codec directly. It opens a document
//! through a [`PixelSource`], asks the [`Document`] for page handles, polls
//! [`Page::is_decoding`] while the decoder works in the background, and finally
//! calls [`Page::render_pixels`] at the size it wants.

use image::{ImageBuffer, Rgba};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Zero-based page index within a document.
pub type PageIndex = usize;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: PageIndex, page_count: usize },
    #[error("document has no pages: {0}")]
    EmptyDocument(String),
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    BufferSize { width: u32, height: u32, expected: usize, actual: usize },
    #[error("page information is not available yet")]
    InfoUnavailable,
    #[error("decoder error: {0}")]
    Backend(String),
}

/// Identity of an opened document.
///
/// This is the string the render cache fingerprints, so two opens of the same
/// source must produce the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenSource {
    Path(PathBuf),
    /// Opaque locator resolved by the source itself (content URIs and the like).
    Uri(String),
}

impl OpenSource {
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::Path(path) => DocumentId::new(format!("file://{}", path.display())),
            Self::Uri(uri) => DocumentId::new(uri.clone()),
        }
    }
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

/// Decode priority hint passed along with a page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DecodePriority {
    /// Read-ahead; the decoder should only work on it when idle.
    Low,
    /// The page somebody is waiting for.
    High,
}

/// Native page dimensions as reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl PageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Raw RGBA8 pixels produced by a page render.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap RGBA8 pixel data, checking that it matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> SourceResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(SourceError::BufferSize { width, height, expected, actual: pixels.len() });
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        // Length was validated in `new`, so this cannot fail.
        ImageBuffer::from_raw(self.width, self.height, self.pixels)
            .unwrap_or_else(|| ImageBuffer::new(0, 0))
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height, pixels: image.into_raw() }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Opens documents.
pub trait PixelSource {
    type Document: Document;

    fn open(&self, source: &OpenSource) -> SourceResult<Self::Document>;
}

/// Decoder state for one opened source.
///
/// The scheduler moves the document onto its worker thread and drops it when
/// the viewer closes the document, so it must be `Send + 'static`.
pub trait Document: Send + 'static {
    type Page: Page;

    fn page_count(&self) -> usize;

    /// Get the handle for `index`, asking the decoder to work on it at
    /// `priority`. A [`DecodePriority::Low`] request whose handle is dropped
    /// straight away is a read-ahead hint.
    fn page(&self, index: PageIndex, priority: DecodePriority) -> SourceResult<Self::Page>;
}

/// Decoder state for one page of a [`Document`].
pub trait Page {
    /// True while the decoder is still producing this page.
    fn is_decoding(&self) -> bool;

    /// Block until the decoder reports progress or `timeout` elapses.
    fn wait_for_progress(&self, timeout: Duration);

    /// Native page dimensions. Available once decoding has finished.
    fn size(&self) -> SourceResult<PageSize>;

    fn render_pixels(&self, width: u32, height: u32) -> SourceResult<PixelBuffer>;
}
