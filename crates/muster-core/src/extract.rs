//! Boundary to the external face feature extractor.

use crate::types::Embedding;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Turns a decoded RGB image into a face embedding.
///
/// Implementations run on a dedicated engine thread and may block.
/// `Ok(None)` means no face was found in the image.
pub trait FaceExtractor: Send {
    fn extract(&mut self, image: &RgbImage) -> Result<Option<Embedding>, ExtractError>;
}
