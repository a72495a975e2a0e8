//! Flipbook Scheduler Library
//!
//! Cooperative cancellation and a bounded worker pool for page rasterization.
//!
//! # Example
//!
//! ```
//! use flipbook_scheduler::{CancellationToken, PagePool, PoolError};
//!
//! let token = CancellationToken::new();
//! let pool = PagePool::new(2);
//!
//! let squares: Result<Vec<u32>, PoolError<String>> =
//!     pool.run(4, &token, |index| Ok(index * index));
//! assert_eq!(squares.unwrap(), vec![0, 1, 4, 9]);
//! ```

mod cancel;
mod pool;

pub use cancel::{CancelOnDrop, CancellationToken, Cancelled};
pub use pool::{PagePool, PoolError};
