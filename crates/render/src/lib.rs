//! Flipbook Render Library
//!
//! Page rasterizer: decodes a paginated document and turns every page into a
//! compressed bitmap, in page order.

pub mod page;
pub mod raster;

pub use page::{PageFormat, RenderedPage};
pub use raster::{
    PageStream, ProgressFn, RasterConfig, RasterError, RasterJob, RasterProgress, Rasterizer,
};
