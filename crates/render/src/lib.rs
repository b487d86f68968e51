//! Document Viewer Render Library
//!
//! The contract the decode scheduler consumes from a page decoder, plus the
//! geometry used to size page renders and a raster-file backed source.
//!
//! A [`PixelSource`] opens documents; a [`Document`] hands out [`Page`]
//! handles; a page reports whether it is still decoding and renders into a
//! [`PixelBuffer`] once it is done.

pub mod geometry;
pub mod image_dir;
pub mod source;

pub use geometry::{scaled_width, RenderSize};
pub use image_dir::{ImageDirDocument, ImageDirPage, ImageDirSource};
pub use source::{
    DecodePriority, Document, DocumentId, OpenSource, Page, PageIndex, PageSize, PixelBuffer,
    PixelSource, RgbaImage, SourceError, SourceResult,
};
