//! Viewer session
//!
//! One session per opened magazine. Mounting checks the reference and the
//! reader's access before anything is fetched; loading then resolves the
//! binary, rasterizes every page into a fresh [`PageCache`] and hands the
//! result to a [`FlipBook`]. Loading can run inline or on a background
//! thread that reports over a channel.

use crate::config::{ConfigError, RenderBackend, ViewerConfig};
use crate::presenter::{Drag, FlipBook, Key, Navigation, Silent, SoundPlayer};
use crate::thumbnails::{ThumbnailItem, ThumbnailNavigator};
use flipbook_cache::{CacheError, PageCache};
use flipbook_render::{RasterError, RasterProgress, Rasterizer};
use flipbook_scheduler::{CancelOnDrop, CancellationToken};
use flipbook_storage::{
    DocumentReference, MagazineRecord, MagazineStatus, ReferenceError, ResolveError, Resolver,
    SupabaseStorage, UreqFetcher,
};
use pdf_engine::{BoxedEngine, LopdfEngine, PdfEngineError};
use std::sync::Arc;
use std::thread;

/// Reader capabilities, supplied by whoever authenticated the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessContext {
    pub signed_in: bool,
    /// Admins may read draft issues.
    pub is_admin: bool,
}

impl AccessContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn reader() -> Self {
        Self { signed_in: true, is_admin: false }
    }

    pub fn admin() -> Self {
        Self { signed_in: true, is_admin: true }
    }

    fn can_read(&self, status: MagazineStatus) -> bool {
        status == MagazineStatus::Published || self.is_admin
    }
}

/// Why a session stopped before loading. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateReason {
    InvalidReference(ReferenceError),
    SignInRequired,
    /// The issue is still a draft and the reader is not an admin.
    Unpublished,
}

impl GateReason {
    /// Message shown in place of the viewer.
    pub fn message(&self) -> &'static str {
        match self {
            GateReason::InvalidReference(_) => "Invalid PDF URL",
            GateReason::SignInRequired => "Sign in required",
            GateReason::Unpublished => "Magazine not available",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Reference(ReferenceError),

    #[error("failed to retrieve document: {0}")]
    Retrieval(#[source] ResolveError),

    #[error("failed to read document: {0}")]
    Parse(#[source] RasterError),

    #[error("failed to render document: {0}")]
    Render(#[source] RasterError),

    #[error("rendering backend unavailable: {0}")]
    Backend(#[source] PdfEngineError),

    #[error("failed to cache rendered pages: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to start loader thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("loader stopped without a result")]
    LoaderStopped,

    #[error("loading cancelled")]
    Cancelled,
}

impl From<ResolveError> for ViewerError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Reference(reference) => ViewerError::Reference(reference),
            other => ViewerError::Retrieval(other),
        }
    }
}

impl From<RasterError> for ViewerError {
    fn from(error: RasterError) -> Self {
        match error {
            RasterError::Cancelled => ViewerError::Cancelled,
            error @ RasterError::Parse(_) => ViewerError::Parse(error),
            error => ViewerError::Render(error),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug)]
pub enum ViewerState {
    Gated(GateReason),
    Loading { progress: Option<RasterProgress> },
    Ready,
    Error(ViewerError),
}

impl ViewerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ViewerState::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ViewerState::Loading { .. })
    }
}

/// Snapshot of what the front end renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub current_page: u32,
    pub zoom: f32,
    pub loading: bool,
    pub error: Option<String>,
}

/// Creates a rendering backend for each load.
pub type EngineFactory = Arc<dyn Fn() -> Result<BoxedEngine, PdfEngineError> + Send + Sync>;

fn builtin_engine() -> Result<BoxedEngine, PdfEngineError> {
    Ok(Box::new(LopdfEngine::new()))
}

/// Factory for the configured backend. `Auto` falls back to the built-in
/// renderer when PDFium cannot be loaded.
pub fn engine_factory(backend: RenderBackend) -> EngineFactory {
    match backend {
        RenderBackend::Builtin => Arc::new(builtin_engine),
        #[cfg(feature = "pdfium")]
        RenderBackend::Pdfium => Arc::new(|| {
            let engine = pdf_engine::pdfium_backend::PdfiumEngine::from_system_library()?;
            Ok(Box::new(engine) as BoxedEngine)
        }),
        #[cfg(feature = "pdfium")]
        RenderBackend::Auto => Arc::new(|| {
            match pdf_engine::pdfium_backend::PdfiumEngine::from_system_library() {
                Ok(engine) => Ok(Box::new(engine) as BoxedEngine),
                Err(err) => {
                    log::warn!("{err}; falling back to the built-in renderer");
                    builtin_engine()
                }
            }
        }),
        #[cfg(not(feature = "pdfium"))]
        RenderBackend::Pdfium => Arc::new(|| {
            Err(PdfEngineError::Backend("built without the pdfium feature".into()))
        }),
        #[cfg(not(feature = "pdfium"))]
        RenderBackend::Auto => Arc::new(builtin_engine),
    }
}

/// Collaborators a session loads through.
#[derive(Clone)]
pub struct Services {
    pub resolver: Resolver,
    pub engine: EngineFactory,
    pub sound: Arc<dyn SoundPlayer>,
    pub config: ViewerConfig,
}

impl Services {
    /// Automatic backend choice, no sound, default configuration.
    pub fn new(resolver: Resolver) -> Self {
        let config = ViewerConfig::default();
        Self {
            resolver,
            engine: engine_factory(config.render.backend),
            sound: Arc::new(Silent),
            config,
        }
    }

    /// Services talking to the hosted bucket named in `config`.
    pub fn from_config(config: &ViewerConfig) -> Result<Self, ConfigError> {
        let storage = &config.storage;
        let base_url = storage.base_url.clone().ok_or(ConfigError::Missing("storage.base_url"))?;
        let api_key = storage.api_key.clone().ok_or(ConfigError::Missing("storage.api_key"))?;

        let fetcher = UreqFetcher::new(config.http_timeout());
        let store = SupabaseStorage::with_fetcher(base_url, storage.bucket.clone(), api_key, fetcher.clone());
        let resolver = Resolver::new(Arc::new(store), Arc::new(fetcher))
            .with_strategy(storage.strategy)
            .with_signed_url_ttl(config.signed_url_ttl());

        Ok(Self::new(resolver).with_config(config.clone()))
    }

    pub fn with_engine(mut self, engine: EngineFactory) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_sound(mut self, sound: Arc<dyn SoundPlayer>) -> Self {
        self.sound = sound;
        self
    }

    /// Replace the configuration. The engine follows `render.backend`, so
    /// call [`with_engine`](Self::with_engine) afterwards to override it.
    pub fn with_config(mut self, config: ViewerConfig) -> Self {
        self.engine = engine_factory(config.render.backend);
        self.config = config;
        self
    }
}

/// Messages from a background load.
#[derive(Debug)]
pub enum LoadEvent {
    Progress(RasterProgress),
    Finished(Arc<PageCache>),
    Failed(ViewerError),
}

struct Loader {
    events: flume::Receiver<LoadEvent>,
    cancel: CancelOnDrop,
}

/// One magazine being read.
pub struct ViewerSession {
    reference: Option<DocumentReference>,
    expected_pages: Option<u32>,
    services: Services,
    state: ViewerState,
    book: Option<FlipBook>,
    cache: Option<Arc<PageCache>>,
    navigator: ThumbnailNavigator,
    loader: Option<Loader>,
}

impl ViewerSession {
    /// Check the reference and the reader's access. Nothing is fetched here.
    pub fn mount(reference: Option<&str>, access: &AccessContext, services: Services) -> Self {
        let navigator = ThumbnailNavigator::new(services.config.thumbnail_config());
        let mut session = Self {
            reference: None,
            expected_pages: None,
            services,
            state: ViewerState::Loading { progress: None },
            book: None,
            cache: None,
            navigator,
            loader: None,
        };

        match DocumentReference::parse(reference.unwrap_or_default()) {
            Err(err) => {
                log::warn!("not loading magazine: {err}");
                session.state = ViewerState::Gated(GateReason::InvalidReference(err));
            }
            Ok(_) if !access.signed_in => {
                log::info!("not loading magazine: reader is not signed in");
                session.state = ViewerState::Gated(GateReason::SignInRequired);
            }
            Ok(parsed) => {
                log::info!("mounting viewer for {parsed}");
                session.reference = Some(parsed);
            }
        }

        session
    }

    /// Mount the PDF of a magazine record. Drafts are gated for readers who
    /// are not admins. The record's page count is checked against the
    /// rendered document.
    pub fn mount_record(record: &MagazineRecord, access: &AccessContext, services: Services) -> Self {
        let mut session = Self::mount(record.pdf_url.as_deref(), access, services);
        session.expected_pages = record.total_pages;
        if session.reference.is_some() && !access.can_read(record.status) {
            log::info!("not loading magazine {}: draft issue", record.id);
            session.reference = None;
            session.state = ViewerState::Gated(GateReason::Unpublished);
        }
        session
    }

    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn reference(&self) -> Option<&DocumentReference> {
        self.reference.as_ref()
    }

    /// Presenter, once every page is cached.
    pub fn book(&self) -> Option<&FlipBook> {
        self.book.as_ref()
    }

    pub fn book_mut(&mut self) -> Option<&mut FlipBook> {
        self.book.as_mut()
    }

    pub fn cache(&self) -> Option<&Arc<PageCache>> {
        self.cache.as_ref()
    }

    pub fn snapshot(&self) -> SessionState {
        SessionState {
            current_page: self.book.as_ref().map_or(0, FlipBook::current_page),
            zoom: self.book.as_ref().map_or(1.0, FlipBook::zoom),
            loading: self.state.is_loading(),
            error: match &self.state {
                ViewerState::Error(err) => Some(err.to_string()),
                ViewerState::Gated(reason) => Some(reason.message().to_string()),
                _ => None,
            },
        }
    }

    /// Run the whole load on the calling thread.
    pub fn load_blocking(&mut self) -> &ViewerState {
        self.load_blocking_with(&CancellationToken::new())
    }

    /// Like [`load_blocking`](Self::load_blocking), stopping between pages
    /// once `token` is cancelled.
    pub fn load_blocking_with(&mut self, token: &CancellationToken) -> &ViewerState {
        let Some(reference) = self.pending_reference() else {
            return &self.state;
        };

        let progress = |_: RasterProgress| {};
        let result = load_pages(&reference, &self.services, token, &progress);
        self.finish(result);
        &self.state
    }

    /// Start loading on a background thread. Call [`poll`](Self::poll) or
    /// [`wait`](Self::wait) to pick up the result.
    pub fn spawn_load(&mut self) {
        let Some(reference) = self.pending_reference() else {
            return;
        };

        let token = CancellationToken::new();
        let cancel = token.clone().cancel_on_drop();
        let (sender, events) = flume::unbounded();
        let services = self.services.clone();

        let spawned = thread::Builder::new().name("flipbook-loader".into()).spawn(move || {
            let progress_sender = sender.clone();
            let progress = move |progress: RasterProgress| {
                let _ = progress_sender.send(LoadEvent::Progress(progress));
            };
            let event = match load_pages(&reference, &services, &token, &progress) {
                Ok(cache) => LoadEvent::Finished(cache),
                Err(err) => LoadEvent::Failed(err),
            };
            // The session may already be gone.
            let _ = sender.send(event);
        });

        match spawned {
            Ok(_) => self.loader = Some(Loader { events, cancel }),
            Err(err) => self.state = ViewerState::Error(ViewerError::Spawn(err)),
        }
    }

    /// Apply pending loader events without blocking. Returns whether the
    /// state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        loop {
            let Some(loader) = self.loader.as_ref() else {
                return changed;
            };
            match loader.events.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    changed = true;
                }
                Err(flume::TryRecvError::Empty) => return changed,
                Err(flume::TryRecvError::Disconnected) => {
                    self.loader_stopped();
                    return true;
                }
            }
        }
    }

    /// Block until the background load finishes.
    pub fn wait(&mut self) -> &ViewerState {
        while let Some(loader) = self.loader.as_ref() {
            match loader.events.recv() {
                Ok(event) => self.apply(event),
                Err(flume::RecvError::Disconnected) => self.loader_stopped(),
            }
        }
        &self.state
    }

    /// Stop a running load. Pages already rendered are discarded.
    pub fn cancel(&mut self) {
        if let Some(loader) = self.loader.take() {
            loader.cancel.token().cancel();
            log::info!("magazine load cancelled");
            self.state = ViewerState::Error(ViewerError::Cancelled);
        }
    }

    fn pending_reference(&self) -> Option<DocumentReference> {
        if !self.state.is_loading() || self.loader.is_some() || self.book.is_some() {
            return None;
        }
        self.reference.clone()
    }

    fn apply(&mut self, event: LoadEvent) {
        match event {
            LoadEvent::Progress(progress) => {
                self.state = ViewerState::Loading { progress: Some(progress) };
            }
            LoadEvent::Finished(cache) => {
                self.loader = None;
                self.finish(Ok(cache));
            }
            LoadEvent::Failed(err) => {
                self.loader = None;
                self.finish(Err(err));
            }
        }
    }

    fn loader_stopped(&mut self) {
        self.loader = None;
        if self.state.is_loading() {
            log::error!("magazine loader exited without reporting");
            self.state = ViewerState::Error(ViewerError::LoaderStopped);
        }
    }

    fn finish(&mut self, result: Result<Arc<PageCache>, ViewerError>) {
        match result {
            Ok(cache) => {
                let page_count = cache.page_count();
                if let Some(expected) = self.expected_pages.filter(|expected| *expected != page_count) {
                    log::warn!("magazine record lists {expected} pages, document has {page_count}");
                }
                log::info!("magazine ready: {page_count} pages");
                self.book = Some(FlipBook::with_sound(
                    page_count,
                    self.services.config.flip_book_config(),
                    self.services.sound.clone(),
                ));
                self.cache = Some(cache);
                self.state = ViewerState::Ready;
            }
            Err(err) => {
                log::error!("failed to load magazine: {err}");
                self.state = ViewerState::Error(err);
            }
        }
    }

    pub fn next_page(&mut self) -> Navigation {
        self.book.as_mut().map_or(Navigation::Unchanged, FlipBook::next_page)
    }

    pub fn previous_page(&mut self) -> Navigation {
        self.book.as_mut().map_or(Navigation::Unchanged, FlipBook::previous_page)
    }

    pub fn jump_to(&mut self, page: u32) -> Navigation {
        self.book.as_mut().map_or(Navigation::Unchanged, |book| book.jump_to(page))
    }

    pub fn handle_key(&mut self, key: Key) -> Navigation {
        self.book.as_mut().map_or(Navigation::Unchanged, |book| book.handle_key(key))
    }

    pub fn handle_drag(&mut self, drag: Drag) -> Navigation {
        self.book.as_mut().map_or(Navigation::Unchanged, |book| book.handle_drag(drag))
    }

    pub fn thumbnails(&self) -> Vec<ThumbnailItem> {
        match (&self.cache, &self.book) {
            (Some(cache), Some(book)) => self.navigator.items(cache, book),
            _ => Vec::new(),
        }
    }

    pub fn activate_thumbnail(&mut self, index: u32) -> Navigation {
        match self.book.as_mut() {
            Some(book) => self.navigator.activate(index, book),
            None => Navigation::Unchanged,
        }
    }

    pub fn navigator(&self) -> &ThumbnailNavigator {
        &self.navigator
    }
}

/// Resolve, rasterize and cache one document.
fn load_pages(
    reference: &DocumentReference,
    services: &Services,
    token: &CancellationToken,
    progress: &(dyn Fn(RasterProgress) + Sync),
) -> Result<Arc<PageCache>, ViewerError> {
    token.check().map_err(|_| ViewerError::Cancelled)?;
    let bytes = services.resolver.resolve(reference)?;
    token.check().map_err(|_| ViewerError::Cancelled)?;

    let config = &services.config;
    let engine = (services.engine)().map_err(ViewerError::Backend)?;
    let mut rasterizer = Rasterizer::with_engine(engine, config.raster_config());
    let job = rasterizer.open(bytes)?;

    let pages = match config.page_pool() {
        Some(pool) => job.render_all_parallel(token, &pool, Some(progress))?,
        None => job.render_all(token, Some(progress))?,
    };

    let mut cache = PageCache::new(job.page_count());
    if let Some(limit) = config.memory_limit_bytes() {
        cache = cache.with_memory_limit(limit);
    }
    cache.insert_all(pages)?;
    Ok(Arc::new(cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipbook_storage::MemoryStore;
    use pdf_engine::{
        fixtures, DocumentHandle, PageSize, PdfEngine, RenderRequest, RgbaImage, ThumbnailSize,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const ISSUE: &str = "magazines/issue-12.pdf";
    const PUBLISHED_ISSUE: &str = r#"{"id":"12","title":"Issue 12","pdf_url":"/magazines/issue-12.pdf","total_pages":4,"status":"published"}"#;
    const DRAFT_ISSUE: &str = r#"{"id":"13","title":"Issue 13","pdf_url":"/magazines/issue-12.pdf","status":"draft"}"#;

    /// Built-in engine with hooks: it can fail one page, hold every page
    /// until released, count finished pages and report when it is dropped.
    #[derive(Default)]
    struct TestEngine {
        inner: LopdfEngine,
        fail_on: Option<u32>,
        gate: Option<(flume::Sender<u32>, flume::Receiver<()>)>,
        rendered: Arc<AtomicUsize>,
        dropped: Option<flume::Sender<()>>,
    }

    impl Drop for TestEngine {
        fn drop(&mut self) {
            if let Some(dropped) = &self.dropped {
                let _ = dropped.send(());
            }
        }
    }

    impl PdfEngine for TestEngine {
        fn open(&mut self, bytes: Vec<u8>) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(bytes)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_size(&self, handle: DocumentHandle, page_index: u32) -> Result<PageSize, PdfEngineError> {
            self.inner.page_size(handle, page_index)
        }

        fn render_page(&self, handle: DocumentHandle, request: RenderRequest) -> Result<RgbaImage, PdfEngineError> {
            if let Some((started, release)) = &self.gate {
                let _ = started.send(request.page_index);
                let _ = release.recv();
            }
            if self.fail_on == Some(request.page_index) {
                return Err(PdfEngineError::Backend("out of memory".into()));
            }
            let surface = self.inner.render_page(handle, request)?;
            self.rendered.fetch_add(1, Ordering::SeqCst);
            Ok(surface)
        }

        fn render_thumbnail(
            &self,
            handle: DocumentHandle,
            page_index: u32,
            target: ThumbnailSize,
        ) -> Result<RgbaImage, PdfEngineError> {
            self.inner.render_thumbnail(handle, page_index, target)
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        engines: Arc<AtomicUsize>,
        services: Services,
    }

    fn harness(pages: usize) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store.insert(ISSUE, fixtures::pdf_with_pages(pages));

        let engines = Arc::new(AtomicUsize::new(0));
        let counter = engines.clone();
        let factory: EngineFactory = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(LopdfEngine::new()) as BoxedEngine)
        });

        let mut config = ViewerConfig::default();
        config.render.scale = 0.25;
        let services = Services::new(Resolver::new(store.clone(), store.clone()))
            .with_config(config)
            .with_engine(factory);

        Harness { store, engines, services }
    }

    #[test]
    fn twenty_four_page_issue_reads_end_to_end() {
        let h = harness(24);
        let mut session = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), h.services);
        assert!(session.state().is_loading());

        assert!(session.load_blocking().is_ready());
        let cache = session.cache().cloned().expect("cache after load");
        assert_eq!(cache.len(), 24);
        assert!(cache.is_complete());
        assert_eq!(session.book().map(FlipBook::current_page), Some(0));

        for _ in 0..23 {
            assert!(session.next_page().moved());
        }
        assert_eq!(session.snapshot().current_page, 23);
        assert_eq!(session.next_page(), Navigation::Unchanged);
        assert_eq!(session.snapshot().current_page, 23);
    }

    #[test]
    fn empty_reference_is_gated_without_calls() {
        let h = harness(1);
        let mut session = ViewerSession::mount(Some(""), &AccessContext::reader(), h.services);

        assert!(matches!(
            session.state(),
            ViewerState::Gated(GateReason::InvalidReference(ReferenceError::Empty))
        ));
        session.load_blocking();
        session.spawn_load();
        assert_eq!(h.store.total_calls(), 0);
        assert_eq!(h.engines.load(Ordering::SeqCst), 0);
        assert_eq!(session.snapshot().error.as_deref(), Some("Invalid PDF URL"));
    }

    #[test]
    fn signed_out_readers_trigger_no_retrieval() {
        let h = harness(2);
        let mut session = ViewerSession::mount(Some(ISSUE), &AccessContext::anonymous(), h.services);

        assert!(matches!(session.state(), ViewerState::Gated(GateReason::SignInRequired)));
        session.load_blocking();
        assert_eq!(h.store.total_calls(), 0);
        assert_eq!(h.engines.load(Ordering::SeqCst), 0);
        assert_eq!(session.next_page(), Navigation::Unchanged);
    }

    #[test]
    fn missing_document_errors_before_rasterizing() {
        let h = harness(2);
        let mut session =
            ViewerSession::mount(Some("magazines/missing.pdf"), &AccessContext::reader(), h.services);

        let state = session.load_blocking();
        assert!(matches!(state, ViewerState::Error(ViewerError::Retrieval(ResolveError::NotFound { .. }))));
        assert_eq!(h.engines.load(Ordering::SeqCst), 0);
        assert!(session.book().is_none());
    }

    #[test]
    fn corrupt_document_is_a_parse_error() {
        let h = harness(1);
        h.store.insert("magazines/broken.pdf", b"not a pdf".to_vec());
        let mut session =
            ViewerSession::mount(Some("magazines/broken.pdf"), &AccessContext::reader(), h.services);

        assert!(matches!(session.load_blocking(), ViewerState::Error(ViewerError::Parse(_))));
    }

    #[test]
    fn single_page_issue_shows_a_cover() {
        let h = harness(1);
        let mut session = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), h.services);
        session.load_blocking();

        let book = session.book().expect("ready");
        assert!(book.spread().is_single());
        assert_eq!(book.page_label(), "Page 1 of 1");
    }

    #[test]
    fn background_load_reports_progress_and_finishes() {
        let h = harness(6);
        let mut session = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), h.services);
        session.spawn_load();

        assert!(session.wait().is_ready());
        assert_eq!(session.cache().map(|cache| cache.len()), Some(6));
        assert!(!session.poll());

        let thumbnails = session.thumbnails();
        assert_eq!(thumbnails.len(), 6);
        assert!(thumbnails[0].highlighted);

        assert!(session.activate_thumbnail(4).moved());
        assert_eq!(session.book().map(|book| book.spread().left), Some(3));
    }

    #[test]
    fn parallel_load_matches_sequential_load() {
        let sequential = harness(7);
        let mut parallel = harness(7);
        parallel.services.config.render.workers = 3;

        let mut a = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), sequential.services);
        let mut b = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), parallel.services);
        a.load_blocking();
        b.load_blocking();

        let pages_a = a.cache().expect("ready").pages();
        let pages_b = b.cache().expect("ready").pages();
        assert_eq!(pages_a.len(), 7);
        for (left, right) in pages_a.iter().zip(&pages_b) {
            assert_eq!(**left, **right);
        }
    }

    #[test]
    fn cancelled_token_stops_loading() {
        let h = harness(3);
        let mut session = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), h.services);
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(session.load_blocking_with(&token), ViewerState::Error(ViewerError::Cancelled)));
        assert_eq!(h.store.total_calls(), 0);
    }

    #[test]
    fn record_page_count_is_carried() {
        let h = harness(4);
        let record = MagazineRecord::from_json(PUBLISHED_ISSUE).unwrap();

        let mut session = ViewerSession::mount_record(&record, &AccessContext::reader(), h.services);
        assert_eq!(session.reference().map(DocumentReference::as_str), Some(ISSUE));
        assert!(session.load_blocking().is_ready());
    }

    #[test]
    fn services_from_config_need_storage_settings() {
        let config = ViewerConfig::default();
        assert!(matches!(Services::from_config(&config), Err(ConfigError::Missing("storage.base_url"))));

        let mut config = ViewerConfig::default();
        config.storage.base_url = Some("https://project.supabase.co".into());
        config.storage.api_key = Some("anon-key".into());
        assert!(Services::from_config(&config).is_ok());
    }

    #[test]
    fn draft_issues_are_gated_for_readers() {
        let h = harness(4);
        let record = MagazineRecord::from_json(DRAFT_ISSUE).unwrap();

        let mut session = ViewerSession::mount_record(&record, &AccessContext::reader(), h.services);
        assert!(matches!(session.state(), ViewerState::Gated(GateReason::Unpublished)));
        assert!(session.reference().is_none());

        session.load_blocking();
        session.spawn_load();
        assert_eq!(h.store.total_calls(), 0);
        assert_eq!(h.engines.load(Ordering::SeqCst), 0);
        assert_eq!(session.snapshot().error.as_deref(), Some("Magazine not available"));
    }

    #[test]
    fn admins_can_read_drafts() {
        let h = harness(4);
        let record = MagazineRecord::from_json(DRAFT_ISSUE).unwrap();

        let mut session = ViewerSession::mount_record(&record, &AccessContext::admin(), h.services);
        assert!(session.load_blocking().is_ready());
        assert_eq!(h.engines.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn render_failures_surface_as_render_errors() {
        let h = harness(3);
        let factory: EngineFactory = Arc::new(|| {
            let mut engine = TestEngine::default();
            engine.fail_on = Some(1);
            Ok(Box::new(engine) as BoxedEngine)
        });
        let services = h.services.with_engine(factory);
        let mut session = ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), services);

        let state = session.load_blocking();
        assert!(matches!(
            state,
            ViewerState::Error(ViewerError::Render(RasterError::Render { page: 1, .. }))
        ));
        assert!(session.book().is_none());
        assert!(session.cache().is_none());
        assert!(session.snapshot().error.is_some_and(|message| message.starts_with("failed to render")));
    }

    #[test]
    fn dropping_the_session_stops_the_background_load() {
        let h = harness(5);
        let (started_tx, started) = flume::unbounded();
        let (release, release_rx) = flume::unbounded();
        let (dropped_tx, dropped) = flume::unbounded();
        let rendered = Arc::new(AtomicUsize::new(0));

        let counter = rendered.clone();
        let factory: EngineFactory = Arc::new(move || {
            let mut engine = TestEngine::default();
            engine.gate = Some((started_tx.clone(), release_rx.clone()));
            engine.rendered = counter.clone();
            engine.dropped = Some(dropped_tx.clone());
            Ok(Box::new(engine) as BoxedEngine)
        });
        let mut session =
            ViewerSession::mount(Some(ISSUE), &AccessContext::reader(), h.services.with_engine(factory));
        session.spawn_load();

        let first = started.recv_timeout(Duration::from_secs(10)).expect("first page should start");
        assert_eq!(first, 0);
        drop(session);
        release.send(()).expect("loader should still be waiting");

        dropped.recv_timeout(Duration::from_secs(10)).expect("loader should release its engine");
        assert_eq!(rendered.load(Ordering::SeqCst), 1);
        assert!(started.try_recv().is_err());
    }

    #[test]
    fn configured_builtin_backend_draws_page_content() {
        let mut config = ViewerConfig::default();
        config.render.backend = RenderBackend::Builtin;
        let services = Services::new(Resolver::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())))
            .with_config(config);

        let mut engine = (services.engine)().expect("built-in engine is always available");
        let bytes = fixtures::pdf_with_content(&[((100.0, 100.0), "0 g 0 0 100 100 re f")]);
        let handle = engine.open(bytes).expect("document should open");
        let surface = engine
            .render_page(handle, RenderRequest { page_index: 0, scale: 1.0 })
            .expect("page should render");

        assert_eq!(surface.get_pixel(50, 50).0, [0, 0, 0, 255]);
    }

    #[cfg(not(feature = "pdfium"))]
    #[test]
    fn pdfium_backend_is_unavailable_without_the_feature() {
        let result = engine_factory(RenderBackend::Pdfium)();
        assert!(matches!(result, Err(PdfEngineError::Backend(_))));
    }
}
