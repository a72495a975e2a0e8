//! Paginated-document backends for the flipbook pipeline.
//!
//! The built-in backend parses documents with `lopdf` and paints their vector
//! content and images with `tiny-skia`; it does not draw text. Enable the
//! `pdfium` feature for full-fidelity rendering through PDFium.

use image::{ImageBuffer, Rgba};
use std::collections::HashMap;

mod content;
mod paint;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;
#[cfg(feature = "pdfium")]
pub mod pdfium_backend;

use content::PageRecord;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Largest edge, in pixels, of a single page surface.
pub const MAX_SURFACE_DIMENSION: u32 = 16_384;

/// Largest allocation, in bytes, for a single page surface.
pub const MAX_SURFACE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Page size in points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSize {
    pub width_px: u32,
    pub height_px: u32,
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self { width_px: 256, height_px: 256 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("document has no pages")]
    NoPages,
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("cannot allocate a {width}x{height} surface for page {page}")]
    SurfaceTooLarge { page: u32, width: u32, height: u32 },
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine {
    fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn render_thumbnail(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target: ThumbnailSize,
    ) -> Result<RgbaImage, PdfEngineError>;
    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

/// Engine chosen at runtime, shareable with a loader thread.
pub type BoxedEngine = Box<dyn PdfEngine + Send + Sync>;

impl<E: PdfEngine + ?Sized> PdfEngine for Box<E> {
    fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError> {
        (**self).open(bytes)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        (**self).page_count(handle)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        (**self).page_size(handle, page_index)
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        (**self).render_page(handle, request)
    }

    fn render_thumbnail(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target: ThumbnailSize,
    ) -> Result<RgbaImage, PdfEngineError> {
        (**self).render_thumbnail(handle, page_index, target)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        (**self).close(handle)
    }
}

/// Pixel dimensions of a page drawn at `scale`, checked against the surface
/// limits.
pub fn surface_size(page_index: u32, size: PageSize, scale: f32) -> Result<(u32, u32), PdfEngineError> {
    let scale = if scale <= 0.0 || !scale.is_finite() { 1.0 } else { scale };
    let width = (size.width_pt * scale).round().max(1.0);
    let height = (size.height_pt * scale).round().max(1.0);

    if width > MAX_SURFACE_DIMENSION as f32 || height > MAX_SURFACE_DIMENSION as f32 {
        return Err(PdfEngineError::SurfaceTooLarge {
            page: page_index,
            width: width as u32,
            height: height as u32,
        });
    }

    let (width, height) = (width as u32, height as u32);
    if u64::from(width) * u64::from(height) * 4 > MAX_SURFACE_BYTES {
        return Err(PdfEngineError::SurfaceTooLarge { page: page_index, width, height });
    }

    Ok((width, height))
}

pub(crate) fn thumbnail_scale(size: PageSize, target: ThumbnailSize) -> f32 {
    (target.width_px.max(1) as f32 / size.width_pt)
        .min(target.height_px.max(1) as f32 / size.height_pt)
        .max(0.01)
}

#[derive(Debug)]
struct DocumentRecord {
    pages: Vec<PageRecord>,
}

/// Built-in backend. Page geometry follows the page tree (inherited
/// `MediaBox`, `CropBox` and `Rotate`).
#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self, handle: DocumentHandle, page_index: u32) -> Result<&PageRecord, PdfEngineError> {
        let record = self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))?;
        record.pages.get(page_index as usize).ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: record.pages.len() as u32,
        })
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }
        let pages = content::load_pages(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        log::debug!("opened document {} with {} pages", handle.raw(), pages.len());
        self.docs.insert(handle, DocumentRecord { pages });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        self.docs
            .get(&handle)
            .map(|record| record.pages.len() as u32)
            .ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        Ok(self.page(handle, page_index)?.geometry.display_size())
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page = self.page(handle, request.page_index)?;
        let (width, height) =
            surface_size(request.page_index, page.geometry.display_size(), request.scale)?;
        let content = page.content.as_ref().map_err(|reason| {
            PdfEngineError::Backend(format!("page {}: {reason}", request.page_index + 1))
        })?;

        paint::render(content, &page.geometry, width, height)
    }

    fn render_thumbnail(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        target: ThumbnailSize,
    ) -> Result<RgbaImage, PdfEngineError> {
        let size = self.page_size(handle, page_index)?;
        self.render_page(handle, RenderRequest { page_index, scale: thumbnail_scale(size, target) })
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}
