//! OCR Module
//!
//! Turns uploaded images into text.
//!
//! Supports multiple backends:
//! - Tesseract (local, requires the `tesseract` binary)
//! - Ollama vision models (local LLM)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nika_server::config::OcrConfig;
//! use nika_server::ocr::OcrService;
//!
//! let service = OcrService::new(&OcrConfig::default());
//!
//! // Decode, normalise and recognise an image file's bytes
//! let result = service.recognize_image(std::fs::read("scan.jpg")?).await?;
//! println!("{}", result.text);
//! ```

mod provider;
mod service;
mod types;

pub use provider::{OcrProviderTrait, OllamaProvider, TesseractProvider};
pub use service::OcrService;
pub use types::{OcrError, OcrProvider, OcrResult};

#[cfg(test)]
pub use provider::MockProvider;
#[cfg(test)]
pub(crate) use service::sample_png;
