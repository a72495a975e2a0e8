//! Page rasterizer
//!
//! Opens a document once, then renders each page at a fixed scale into an
//! off-screen surface and encodes it. Pages are produced strictly in index
//! order. A failure on any page aborts the run; callers re-open to retry.

use crate::page::{PageFormat, RenderedPage};
use flipbook_scheduler::{CancellationToken, Cancelled, PagePool, PoolError};
use pdf_engine::{
    DocumentHandle, LopdfEngine, PdfEngine, PdfEngineError, RenderRequest, ThumbnailSize,
};
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicU32, Ordering};

/// Errors from rasterization.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// The binary is not a valid paginated document.
    #[error("document could not be parsed: {0}")]
    Parse(#[source] PdfEngineError),

    /// A page could not be drawn (surface allocation or decode failure).
    #[error("page {} failed to render: {source}", page + 1)]
    Render {
        page: u32,
        #[source]
        source: PdfEngineError,
    },

    /// A page was drawn but could not be encoded.
    #[error("page {} failed to encode: {source}", page + 1)]
    Encode {
        page: u32,
        #[source]
        source: image::ImageError,
    },

    #[error("rasterization cancelled")]
    Cancelled,
}

impl From<Cancelled> for RasterError {
    fn from(_: Cancelled) -> Self {
        RasterError::Cancelled
    }
}

/// Rendering parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterConfig {
    /// Points-to-pixels scale applied to every page.
    pub scale: f32,

    /// Bitmap encoding; JPEG quality trades fidelity for memory.
    pub format: PageFormat,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self { scale: 1.5, format: PageFormat::default() }
    }
}

/// Rasterization progress, reported after each finished page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterProgress {
    pub completed: u32,
    pub total: u32,
}

impl RasterProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

/// Progress callback. May be invoked from worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(RasterProgress) + Sync);

/// Page rasterizer over a [`PdfEngine`] backend.
pub struct Rasterizer<E: PdfEngine = LopdfEngine> {
    engine: E,
    config: RasterConfig,
}

impl Rasterizer<LopdfEngine> {
    /// Rasterizer over the default backend.
    pub fn new(config: RasterConfig) -> Self {
        Self::with_engine(LopdfEngine::new(), config)
    }
}

impl<E: PdfEngine> Rasterizer<E> {
    pub fn with_engine(engine: E, config: RasterConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Parse `bytes` and prepare to render its pages.
    pub fn open(&mut self, bytes: Vec<u8>) -> Result<RasterJob<'_, E>, RasterError> {
        let handle = self.engine.open(bytes).map_err(RasterError::Parse)?;
        let page_count = match self.engine.page_count(handle) {
            Ok(count) => count,
            Err(err) => {
                let _ = self.engine.close(handle);
                return Err(RasterError::Parse(err));
            }
        };

        log::debug!("document opened for rasterization: {page_count} pages");
        Ok(RasterJob { rasterizer: self, handle, page_count })
    }

    /// Render the first page scaled to fit `max`, for covers and cards.
    pub fn render_cover(
        &mut self,
        bytes: Vec<u8>,
        max: ThumbnailSize,
    ) -> Result<RenderedPage, RasterError> {
        let job = self.open(bytes)?;
        let surface = job
            .rasterizer
            .engine
            .render_thumbnail(job.handle, 0, max)
            .map_err(|source| RasterError::Render { page: 0, source })?;
        RenderedPage::encode(0, surface, job.rasterizer.config.format)
            .map_err(|source| RasterError::Encode { page: 0, source })
    }
}

/// An opened document ready to be rasterized. Closes the document on drop.
pub struct RasterJob<'a, E: PdfEngine> {
    rasterizer: &'a mut Rasterizer<E>,
    handle: DocumentHandle,
    page_count: u32,
}

impl<'a, E: PdfEngine> RasterJob<'a, E> {
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Draw and encode a single page.
    pub fn render_page(&self, index: u32) -> Result<RenderedPage, RasterError> {
        let config = self.rasterizer.config;
        let surface = self
            .rasterizer
            .engine
            .render_page(self.handle, RenderRequest { page_index: index, scale: config.scale })
            .map_err(|source| RasterError::Render { page: index, source })?;

        let page = RenderedPage::encode(index, surface, config.format)
            .map_err(|source| RasterError::Encode { page: index, source })?;

        log::debug!(
            "rendered page {}/{} ({}x{}, {} bytes)",
            index + 1,
            self.page_count,
            page.width,
            page.height,
            page.bytes.len()
        );
        Ok(page)
    }

    /// Lazy, in-order page sequence. Stops for good after the first error.
    pub fn pages<'t>(&'t self, token: &'t CancellationToken) -> PageStream<'t, 'a, E> {
        PageStream { job: self, token, next: 0, done: false }
    }

    /// Render every page in order, one at a time.
    pub fn render_all(
        &self,
        token: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<RenderedPage>, RasterError> {
        let total = self.page_count;
        let mut pages = Vec::with_capacity(total as usize);

        for page in self.pages(token) {
            pages.push(page?);
            if let Some(progress) = progress {
                progress(RasterProgress { completed: pages.len() as u32, total });
            }
        }

        Ok(pages)
    }

    /// Render every page on a bounded worker pool.
    ///
    /// Output is identical to [`render_all`](Self::render_all): complete,
    /// ordered by index, and aborted by the first failing page.
    pub fn render_all_parallel(
        &self,
        token: &CancellationToken,
        pool: &PagePool,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<RenderedPage>, RasterError>
    where
        E: Sync,
    {
        let total = self.page_count;
        let completed = AtomicU32::new(0);

        let result = pool.run(total, token, |index| {
            let page = self.render_page(index)?;
            let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
            if let Some(progress) = progress {
                progress(RasterProgress { completed: done, total });
            }
            Ok::<_, RasterError>(page)
        });

        match result {
            Ok(pages) => Ok(pages),
            Err(PoolError::Cancelled) => Err(RasterError::Cancelled),
            Err(PoolError::Job { error, .. }) => Err(error),
        }
    }
}

impl<E: PdfEngine> Drop for RasterJob<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.rasterizer.engine.close(self.handle) {
            log::warn!("failed to close rasterized document: {err}");
        }
    }
}

/// Iterator over rendered pages. See [`RasterJob::pages`].
pub struct PageStream<'t, 'a, E: PdfEngine> {
    job: &'t RasterJob<'a, E>,
    token: &'t CancellationToken,
    next: u32,
    done: bool,
}

impl<E: PdfEngine> Iterator for PageStream<'_, '_, E> {
    type Item = Result<RenderedPage, RasterError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.next >= self.job.page_count {
            self.done = true;
            return None;
        }
        if let Err(cancelled) = self.token.check() {
            log::debug!("rasterization cancelled before page {}", self.next + 1);
            self.done = true;
            return Some(Err(cancelled.into()));
        }

        let result = self.job.render_page(self.next);
        if result.is_err() {
            self.done = true;
        }
        self.next += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            (0, Some(0))
        } else {
            (0, Some((self.job.page_count - self.next) as usize))
        }
    }
}

impl<E: PdfEngine> FusedIterator for PageStream<'_, '_, E> {}
