use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use warden_contracts::{CompletionRequest, CompletionResponse, ImageRequest, ImageResponse};

use crate::error::UpstreamError;

/// Single-shot calls to the generation service. Every failure, including an
/// expired timeout, comes back as an `Err`; nothing is retried.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(
        &self,
        credential: &str,
        prompt: &str,
        max_tokens: u32,
        model: &str,
    ) -> Result<String, UpstreamError>;
    /// Returns the URL of the generated image.
    async fn generate_image(&self, credential: &str, prompt: &str) -> Result<String, UpstreamError>;
    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, UpstreamError>;
}

pub struct OpenAiClient {
    client: Client,
    api_base: String,
    image_size: String,
}

impl OpenAiClient {
    pub fn new(cfg: &warden_config::Generation) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            image_size: cfg.image_size.clone(),
        })
    }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn complete(
        &self,
        credential: &str,
        prompt: &str,
        max_tokens: u32,
        model: &str,
    ) -> Result<String, UpstreamError> {
        let request = CompletionRequest {
            model,
            prompt,
            max_tokens,
            temperature: 0.0,
        };
        let response = self
            .client
            .post(format!("{}/completions", self.api_base))
            .bearer_auth(credential)
            .json(&request)
            .send()
            .await?;
        let body: CompletionResponse = decode(response).await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.text)
            .ok_or(UpstreamError::Missing("choices[0].text"))
    }

    async fn generate_image(&self, credential: &str, prompt: &str) -> Result<String, UpstreamError> {
        let request = ImageRequest {
            prompt,
            size: &self.image_size,
        };
        let response = self
            .client
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(credential)
            .json(&request)
            .send()
            .await?;
        let body: ImageResponse = decode(response).await?;
        body.data
            .into_iter()
            .next()
            .and_then(|datum| datum.url)
            .ok_or(UpstreamError::Missing("data[0].url"))
    }

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, UpstreamError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, UpstreamError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
