//! Document retrieval for the flip-book viewer.
//!
//! A [`DocumentReference`] names a stored magazine binary, either as an
//! absolute URL or as a path inside the storage bucket. The [`Resolver`]
//! turns a reference into bytes through an [`ObjectStore`] and an
//! [`HttpFetcher`]; both are traits so the viewer can run against the hosted
//! bucket, a local directory, or an in-memory store.

pub mod fetch;
pub mod record;
pub mod reference;
pub mod resolver;
pub mod store;

pub use fetch::{FetchError, HttpFetcher, UreqFetcher};
pub use record::{MagazineRecord, MagazineStatus};
pub use reference::{DocumentReference, ReferenceError};
pub use resolver::{ResolveError, ResolveStrategy, Resolver, DEFAULT_SIGNED_URL_TTL};
#[cfg(any(test, feature = "test-support"))]
pub use store::MemoryStore;
pub use store::{DirectoryStore, ObjectStore, StoreError, SupabaseStorage, MAGAZINES_BUCKET};
