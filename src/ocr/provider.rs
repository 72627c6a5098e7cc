//! OCR Providers
//!
//! Defines the provider trait and implementations for different OCR backends.

use async_trait::async_trait;

use super::types::{OcrError, OcrProvider, OcrResult};

/// OCR provider trait
#[async_trait]
pub trait OcrProviderTrait: Send + Sync {
    /// Get the provider type
    fn provider_type(&self) -> OcrProvider;

    /// Check if the provider is available
    async fn is_available(&self) -> bool;

    /// Perform OCR on a PNG image
    async fn recognize(&self, image_data: &[u8], language: &str) -> Result<OcrResult, OcrError>;
}

/// Tesseract OCR provider, driven through the `tesseract` command line tool
pub struct TesseractProvider {
    binary: String,
}

impl TesseractProvider {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl OcrProviderTrait for TesseractProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Tesseract
    }

    async fn is_available(&self) -> bool {
        tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn recognize(&self, image_data: &[u8], language: &str) -> Result<OcrResult, OcrError> {
        let input_path =
            std::env::temp_dir().join(format!("nika_ocr_{}.png", uuid::Uuid::new_v4()));

        tokio::fs::write(&input_path, image_data)
            .await
            .map_err(|e| OcrError::ProcessingError(format!("Failed to write temp file: {}", e)))?;

        // "stdout" as output base sends the text to standard output
        let output = tokio::process::Command::new(&self.binary)
            .arg(&input_path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg("3")
            .output()
            .await;

        let _ = tokio::fs::remove_file(&input_path).await;

        let output = output
            .map_err(|e| OcrError::ProcessingError(format!("Failed to run tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ProcessingError(format!(
                "Tesseract failed: {}",
                stderr.trim()
            )));
        }

        Ok(OcrResult {
            text: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            confidence: 80.0, // Tesseract doesn't report page confidence on stdout
            provider: OcrProvider::Tesseract,
        })
    }
}

/// Ollama vision model provider
pub struct OllamaProvider {
    client: reqwest::Client,
    /// Ollama API URL
    base_url: String,
    /// Model name (e.g., "llava", "bakllava")
    model: String,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl OcrProviderTrait for OllamaProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Ollama
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn recognize(&self, image_data: &[u8], language: &str) -> Result<OcrResult, OcrError> {
        use base64::Engine;

        let url = format!("{}/api/generate", self.base_url);
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_data);

        let prompt = format!(
            "Extract all text from this image exactly as written. The text language is '{}' \
             (Tesseract code). Return only the extracted text, nothing else.",
            language
        );

        let request = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "images": [image_base64],
            "stream": false
        });

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::ApiError(format!("Failed to call Ollama: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::ApiError(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OcrError::ApiError(format!("Failed to parse response: {}", e)))?;

        let text = result["response"].as_str().unwrap_or("").trim().to_string();

        Ok(OcrResult {
            text,
            confidence: 75.0, // LLMs don't provide confidence scores
            provider: OcrProvider::Ollama,
        })
    }
}

/// Mock provider for testing
///
/// Fails the first `fail_times` calls with a processing error, then returns
/// `text`.
#[cfg(test)]
pub struct MockProvider {
    pub text: String,
    pub available: bool,
    pub fail_times: usize,
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockProvider {
    pub fn returning(text: &str) -> Self {
        Self {
            text: text.to_string(),
            available: true,
            fail_times: 0,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(times: usize, then: &str) -> Self {
        Self {
            fail_times: times,
            ..Self::returning(then)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl OcrProviderTrait for MockProvider {
    fn provider_type(&self) -> OcrProvider {
        OcrProvider::Tesseract
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn recognize(&self, _image_data: &[u8], _language: &str) -> Result<OcrResult, OcrError> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call < self.fail_times {
            return Err(OcrError::ProcessingError(format!("mock failure {}", call + 1)));
        }
        Ok(OcrResult {
            text: self.text.clone(),
            confidence: 100.0,
            provider: OcrProvider::Tesseract,
        })
    }
}
