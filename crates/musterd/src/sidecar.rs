//! HTTP client for an external face embedding service.
//!
//! The service receives a PNG body and answers `{"embedding": [..]}`, or
//! `{"embedding": null}` when it finds no face.

use image::{ImageFormat, RgbImage};
use muster_core::{Embedding, ExtractError, FaceExtractor};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<Vec<f32>>,
}

pub struct SidecarExtractor {
    client: Client,
    url: String,
}

impl SidecarExtractor {
    /// Build the blocking client. Must be called off the async runtime.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractError::Unavailable(format!("http client: {e}")))?;
        tracing::info!(url, "embedding sidecar configured");
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl FaceExtractor for SidecarExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Option<Embedding>, ExtractError> {
        let mut body = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut body), ImageFormat::Png)
            .map_err(|e| ExtractError::Failed(format!("png encode: {e}")))?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/png")
            .body(body)
            .send()
            .map_err(|e| ExtractError::Unavailable(format!("{}: {e}", self.url)))?
            .error_for_status()
            .map_err(|e| ExtractError::Failed(format!("sidecar: {e}")))?;

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| ExtractError::Failed(format!("sidecar response: {e}")))?;

        Ok(parsed.embedding.map(Embedding::new))
    }
}
