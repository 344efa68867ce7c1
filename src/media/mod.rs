/// Media handling module
///
/// This module handles:
/// - Type and size validation of uploaded files
/// - Downscaling and JPEG re-encoding before storage

pub mod normalize;
pub mod validate;

pub use normalize::{normalize, scale_dimensions, NormalizedImage};
pub use validate::validate;
