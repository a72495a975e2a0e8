//! Flipbook Cache Library
//!
//! Session-scoped, write-once page cache for rendered pages.

pub mod pages;

pub use pages::{CacheError, CacheStats, PageCache};
