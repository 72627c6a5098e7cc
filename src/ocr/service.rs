//! OCR Service
//!
//! Orchestrates OCR providers and prepares uploaded images for them.

use std::io::Cursor;
use std::sync::Arc;

use super::{
    provider::{OcrProviderTrait, OllamaProvider, TesseractProvider},
    types::{OcrError, OcrProvider, OcrResult},
};
use crate::config::OcrConfig;

/// OCR service trying configured providers in order
pub struct OcrService {
    language: String,
    providers: Vec<Arc<dyn OcrProviderTrait>>,
}

impl OcrService {
    /// Create a new OCR service from configuration
    pub fn new(config: &OcrConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|provider| -> Arc<dyn OcrProviderTrait> {
                match provider {
                    OcrProvider::Tesseract => Arc::new(TesseractProvider::new(&config.tesseract_bin)),
                    OcrProvider::Ollama => {
                        Arc::new(OllamaProvider::new(&config.ollama_url, &config.ollama_model))
                    }
                }
            })
            .collect();

        Self::with_providers(providers, &config.language)
    }

    /// Create a service over an explicit provider list
    pub fn with_providers(providers: Vec<Arc<dyn OcrProviderTrait>>, language: &str) -> Self {
        Self {
            language: language.to_string(),
            providers,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Get available providers
    pub async fn available_providers(&self) -> Vec<OcrProvider> {
        let mut available = Vec::new();
        for provider in &self.providers {
            if provider.is_available().await {
                available.push(provider.provider_type());
            }
        }
        available
    }

    /// Decode an image file's bytes and run OCR on it
    ///
    /// Any format the `image` crate reads is accepted; providers always
    /// receive PNG.
    pub async fn recognize_image(&self, raw: Vec<u8>) -> Result<OcrResult, OcrError> {
        let png = tokio::task::spawn_blocking(move || normalize_image(&raw))
            .await
            .map_err(|e| OcrError::ProcessingError(format!("Image task failed: {}", e)))??;

        self.recognize(&png).await
    }

    /// Perform OCR on a PNG image with the first provider that succeeds
    pub async fn recognize(&self, image_data: &[u8]) -> Result<OcrResult, OcrError> {
        let mut last_error = None;

        for provider in &self.providers {
            if !provider.is_available().await {
                tracing::debug!("OCR provider {:?} unavailable, skipping", provider.provider_type());
                continue;
            }
            match provider.recognize(image_data, &self.language).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(
                        "OCR provider {:?} failed: {}, trying next",
                        provider.provider_type(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            OcrError::ProviderNotAvailable("No OCR providers available".to_string())
        }))
    }
}

/// Decode an image and re-encode it as PNG
fn normalize_image(raw: &[u8]) -> Result<Vec<u8>, OcrError> {
    let img = image::load_from_memory(raw).map_err(|e| OcrError::ImageDecode(e.to_string()))?;

    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .map_err(|e| OcrError::ProcessingError(format!("Failed to encode image: {}", e)))?;

    Ok(buffer)
}

#[cfg(test)]
pub(crate) fn sample_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        8,
        8,
        image::Rgb([255, 255, 255]),
    ));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    buffer
}
