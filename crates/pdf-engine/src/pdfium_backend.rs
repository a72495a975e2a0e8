//! PDFium-backed engine.

use crate::{
    surface_size, thumbnail_scale, DocumentHandle, PageSize, PdfEngine, PdfEngineError,
    RenderRequest, RgbaImage, ThumbnailSize,
};
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::sync::OnceLock;

/// PDFium may only be initialised once per process.
static PDFIUM: OnceLock<Pdfium> = OnceLock::new();

fn pdfium() -> Result<&'static Pdfium, PdfEngineError> {
    if let Some(pdfium) = PDFIUM.get() {
        return Ok(pdfium);
    }

    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|err| PdfEngineError::Backend(format!("failed to bind pdfium library: {err}")))?;

    Ok(PDFIUM.get_or_init(|| Pdfium::new(bindings)))
}

fn backend(err: PdfiumError) -> PdfEngineError {
    PdfEngineError::Backend(err.to_string())
}

struct OpenDocument {
    document: PdfDocument<'static>,
    sizes: Vec<PageSize>,
}

/// Each document is parsed once at `open` and kept until `close`. PDFium
/// serialises calls internally, so parallel page workers do not speed it up.
pub struct PdfiumEngine {
    pdfium: &'static Pdfium,
    next_handle: u64,
    docs: HashMap<DocumentHandle, OpenDocument>,
}

impl PdfiumEngine {
    pub fn from_system_library() -> Result<Self, PdfEngineError> {
        Ok(Self { pdfium: pdfium()?, next_handle: 0, docs: HashMap::new() })
    }

    fn document(&self, handle: DocumentHandle) -> Result<&OpenDocument, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

impl PdfEngine for PdfiumEngine {
    fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError> {
        let document = self.pdfium.load_pdf_from_byte_vec(bytes, None).map_err(|err| match err {
            PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                PdfEngineError::EncryptedUnsupported
            }
            other => backend(other),
        })?;

        let sizes: Vec<PageSize> = document
            .pages()
            .iter()
            .map(|page| PageSize { width_pt: page.width().value, height_pt: page.height().value })
            .collect();
        if sizes.is_empty() {
            return Err(PdfEngineError::NoPages);
        }

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        log::debug!("pdfium opened document {} with {} pages", handle.raw(), sizes.len());
        self.docs.insert(handle, OpenDocument { document, sizes });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.document(handle)?.sizes.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let open = self.document(handle)?;
        open.sizes.get(page_index as usize).copied().ok_or(PdfEngineError::PageOutOfRange {
            page: page_index,
            page_count: open.sizes.len() as u32,
        })
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let size = self.page_size(handle, request.page_index)?;
        let (width, height) = surface_size(request.page_index, size, request.scale)?;

        let page = self
            .document(handle)?
            .document
            .pages()
            .get(request.page_index as u16)
            .map_err(backend)?;
        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);
        let bitmap = page.render_with_config(&config).map_err(backend)?;

        RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(|| {
            PdfEngineError::Backend(format!(
                "pdfium returned a bitmap that does not match {width}x{height}"
            ))
        })
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
