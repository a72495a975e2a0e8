//! Flip-book viewing for magazine PDFs.
//!
//! - [`session`]: gating, loading and the lifecycle of one opened magazine
//! - [`presenter`]: spreads, navigation, page-turn animation and zoom
//! - [`thumbnails`]: the page strip used to jump around the issue
//! - [`config`]: file and environment configuration
//!
//! ```no_run
//! use flipbook_viewer::{AccessContext, Services, ViewerConfig, ViewerSession};
//!
//! let config = ViewerConfig::load(None)?;
//! let services = Services::from_config(&config)?;
//! let mut session =
//!     ViewerSession::mount(Some("magazines/issue-12.pdf"), &AccessContext::reader(), services);
//! if session.load_blocking().is_ready() {
//!     session.next_page();
//! }
//! # Ok::<(), flipbook_viewer::ConfigError>(())
//! ```

pub mod config;
pub mod presenter;
pub mod session;
pub mod thumbnails;

pub use config::{ConfigError, ImageFormat, RenderBackend, ViewerConfig};
pub use presenter::{
    Drag, FlipAnimation, FlipBook, FlipBookConfig, FlipDirection, Key, Navigation, Silent,
    SoundError, SoundPlayer, Spread,
};
pub use session::{
    engine_factory, AccessContext, EngineFactory, GateReason, LoadEvent, Services, SessionState,
    ViewerError, ViewerSession, ViewerState,
};
pub use thumbnails::{ThumbnailConfig, ThumbnailItem, ThumbnailNavigator};
