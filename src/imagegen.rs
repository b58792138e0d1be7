use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RenderError, Result};

const OPENAI_IMAGE_API: &str = "https://api.openai.com/v1/images/generations";
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

// Downloads smaller than this are considered failed generations.
const MIN_IMAGE_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
}

/// Generation backend, selected once at configuration time.
pub enum ImageBackend {
    OpenAi(OpenAiImageClient),
    Disabled,
}

impl ImageBackend {
    pub fn from_api_key(api_key: Option<String>) -> Result<Self> {
        match api_key {
            Some(key) if !key.trim().is_empty() => {
                Ok(ImageBackend::OpenAi(OpenAiImageClient::new(key)?))
            }
            _ => {
                warn!("no API key configured, image generation disabled");
                Ok(ImageBackend::Disabled)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ImageBackend::OpenAi(_))
    }

    pub async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        match self {
            ImageBackend::OpenAi(client) => client.generate(request).await,
            ImageBackend::Disabled => Err(RenderError::Generation(
                "image generation backend is disabled".into(),
            )),
        }
    }
}

pub struct OpenAiImageClient {
    api_key: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    quality: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

impl OpenAiImageClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(GENERATION_TIMEOUT).build()?;
        Ok(Self { api_key, client })
    }

    pub async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        debug!("requesting image: {:.100}", request.prompt);
        let body = GenerationRequest {
            model: "dall-e-3",
            prompt: &request.prompt,
            n: 1,
            size: &request.size,
            quality: &request.quality,
        };
        let response: GenerationResponse = self
            .client
            .post(OPENAI_IMAGE_API)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let url = response
            .data
            .first()
            .and_then(|image| image.url.clone())
            .ok_or_else(|| RenderError::Generation("no image URL in response".into()))?;

        let bytes = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if bytes.len() < MIN_IMAGE_BYTES {
            return Err(RenderError::Generation(format!(
                "downloaded image is suspiciously small ({} bytes)",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_disables_backend() {
        let backend = ImageBackend::from_api_key(Some("   ".into())).unwrap();
        assert!(!backend.is_enabled());
        let backend = ImageBackend::from_api_key(None).unwrap();
        assert!(!backend.is_enabled());
    }

    #[test]
    fn key_enables_backend() {
        let backend = ImageBackend::from_api_key(Some("sk-test".into())).unwrap();
        assert!(backend.is_enabled());
    }

    #[tokio::test]
    async fn disabled_backend_refuses_generation() {
        let backend = ImageBackend::Disabled;
        let err = backend
            .generate(&ImageRequest {
                prompt: "a misty graveyard".into(),
                size: "1792x1024".into(),
                quality: "standard".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Generation(_)));
    }
}
