//! PDF page splitting and scan orientation correction
//!
//! - [`split`]: one PDF in, one self-contained single-page PDF per page out
//! - [`orient`]: contour-based orientation heuristic for page images
//! - [`raster`]: applies [`orient`] to the images embedded in a page
//!
//! Parsing strictness is always chosen explicitly through [`SplitOptions`].

pub mod error;
pub mod options;
pub mod orient;
pub mod raster;
pub mod split;

#[cfg(test)]
mod test_support;

pub use error::PageSplitError;
pub use options::{ParseMode, SplitOptions};
pub use orient::{correct, correct_encoded, OrientationEstimate, RasterImage};
pub use raster::correct_page_images;
pub use split::{page_count, split, split_page};
