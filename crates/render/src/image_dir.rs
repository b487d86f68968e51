//! Raster-file page source
//!
//! Treats a single image file as a one-page document and a directory of image
//! files as a multi-page document, one page per file in file-name order.
//! Decoding happens synchronously inside [`Page::render_pixels`], so pages never
//! report themselves as still decoding.

use crate::source::{
    DecodePriority, Document, OpenSource, Page, PageIndex, PageSize, PixelBuffer, PixelSource,
    SourceError, SourceResult,
};
use image::imageops::{self, FilterType};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// [`PixelSource`] over raster files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDirSource;

impl ImageDirSource {
    pub fn new() -> Self {
        Self
    }

    fn collect_pages(path: &Path) -> SourceResult<Vec<PathBuf>> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let mut pages = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();
            if entry_path.is_file() && is_page_file(&entry_path) {
                pages.push(entry_path);
            }
        }
        pages.sort();
        Ok(pages)
    }
}

fn is_page_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

impl PixelSource for ImageDirSource {
    type Document = ImageDirDocument;

    fn open(&self, source: &OpenSource) -> SourceResult<ImageDirDocument> {
        let path = match source {
            OpenSource::Path(path) => path,
            OpenSource::Uri(uri) => {
                return Err(SourceError::Backend(format!("unsupported locator: {uri}")));
            }
        };

        let pages = Self::collect_pages(path)?;
        if pages.is_empty() {
            return Err(SourceError::EmptyDocument(path.display().to_string()));
        }

        debug!("opened {} with {} page(s)", path.display(), pages.len());
        Ok(ImageDirDocument { pages })
    }
}

/// Ordered list of page files.
#[derive(Debug, Clone)]
pub struct ImageDirDocument {
    pages: Vec<PathBuf>,
}

impl ImageDirDocument {
    pub fn page_path(&self, index: PageIndex) -> Option<&Path> {
        self.pages.get(index).map(PathBuf::as_path)
    }
}

impl Document for ImageDirDocument {
    type Page = ImageDirPage;

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page(&self, index: PageIndex, _priority: DecodePriority) -> SourceResult<ImageDirPage> {
        let path = self
            .pages
            .get(index)
            .ok_or(SourceError::PageOutOfRange { page: index, page_count: self.pages.len() })?;
        Ok(ImageDirPage { path: path.clone() })
    }
}

#[derive(Debug, Clone)]
pub struct ImageDirPage {
    path: PathBuf,
}

impl Page for ImageDirPage {
    fn is_decoding(&self) -> bool {
        false
    }

    fn wait_for_progress(&self, _timeout: Duration) {}

    fn size(&self) -> SourceResult<PageSize> {
        let (width, height) = image::image_dimensions(&self.path)?;
        Ok(PageSize::new(width, height))
    }

    fn render_pixels(&self, width: u32, height: u32) -> SourceResult<PixelBuffer> {
        let source = image::open(&self.path)?.to_rgba8();
        if source.dimensions() == (width, height) {
            return Ok(PixelBuffer::from(source));
        }
        Ok(PixelBuffer::from(imageops::resize(&source, width, height, FilterType::Triangle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RgbaImage;
    use image::Rgba;

    fn write_page(dir: &Path, name: &str, width: u32, height: u32, shade: u8) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]))
            .save(&path)
            .expect("page fixture should be written");
        path
    }

    #[test]
    fn directory_pages_are_sorted_by_name() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        write_page(temp.path(), "002.png", 4, 4, 20);
        write_page(temp.path(), "001.png", 4, 4, 10);
        fs::write(temp.path().join("notes.txt"), b"not a page").unwrap();

        let doc = ImageDirSource::new().open(&OpenSource::from(temp.path())).unwrap();

        assert_eq!(doc.page_count(), 2);
        assert!(doc.page_path(0).unwrap().ends_with("001.png"));
        assert!(doc.page_path(1).unwrap().ends_with("002.png"));
    }

    #[test]
    fn single_file_is_one_page() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let path = write_page(temp.path(), "cover.png", 8, 6, 0);

        let doc = ImageDirSource::new().open(&OpenSource::Path(path)).unwrap();
        assert_eq!(doc.page_count(), 1);

        let page = doc.page(0, DecodePriority::High).unwrap();
        assert!(!page.is_decoding());
        assert_eq!(page.size().unwrap(), PageSize::new(8, 6));
    }

    #[test]
    fn empty_directory_is_rejected() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let err = ImageDirSource::new().open(&OpenSource::from(temp.path())).unwrap_err();
        assert!(matches!(err, SourceError::EmptyDocument(_)));
    }

    #[test]
    fn uri_sources_are_rejected() {
        let err =
            ImageDirSource::new().open(&OpenSource::Uri("content://x".to_string())).unwrap_err();
        assert!(matches!(err, SourceError::Backend(_)));
    }

    #[test]
    fn out_of_range_page_fails() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        write_page(temp.path(), "a.png", 2, 2, 0);
        let doc = ImageDirSource::new().open(&OpenSource::from(temp.path())).unwrap();

        let err = doc.page(3, DecodePriority::Low).unwrap_err();
        assert!(matches!(err, SourceError::PageOutOfRange { page: 3, page_count: 1 }));
    }

    #[test]
    fn render_resamples_to_requested_size() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        write_page(temp.path(), "a.png", 10, 20, 128);
        let doc = ImageDirSource::new().open(&OpenSource::from(temp.path())).unwrap();
        let page = doc.page(0, DecodePriority::High).unwrap();

        let pixels = page.render_pixels(5, 10).unwrap();
        assert_eq!((pixels.width(), pixels.height()), (5, 10));
        assert_eq!(pixels.pixels().len(), 5 * 10 * 4);
    }
}
