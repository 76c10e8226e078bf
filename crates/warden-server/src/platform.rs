use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;
use warden_contracts::{
    ConversationMember, ConversationMembers, OutgoingMessage, PlatformErrorBody, SavedPhoto,
    UploadServer, UploadedPhoto,
};

use crate::error::UpstreamError;

/// Outbound calls to the chat platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), UpstreamError>;
    async fn conversation_members(
        &self,
        peer_id: i64,
    ) -> Result<Vec<ConversationMember>, UpstreamError>;
    /// First step of the photo upload: asks the platform which server takes the file.
    async fn photo_upload_server(&self, peer_id: i64) -> Result<String, UpstreamError>;
    async fn upload_photo(
        &self,
        upload_url: &str,
        image: Vec<u8>,
    ) -> Result<UploadedPhoto, UpstreamError>;
    async fn save_photo(&self, photo: &UploadedPhoto) -> Result<SavedPhoto, UpstreamError>;
}

pub struct VkClient {
    client: Client,
    api_base: String,
    access_token: String,
    api_version: String,
}

impl VkClient {
    pub fn new(cfg: &warden_config::Platform) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
            api_version: cfg.api_version.clone(),
        })
    }

    async fn call(
        &self,
        method: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<Value, UpstreamError> {
        params.push(("access_token", self.access_token.clone()));
        params.push(("v", self.api_version.clone()));

        let url = format!("{}/{method}", self.api_base);
        let response = self.client.post(url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let mut body: Value = serde_json::from_slice(&bytes)?;
        if let Some(error) = body.get("error") {
            let error: PlatformErrorBody = serde_json::from_value(error.clone())?;
            return Err(UpstreamError::Api {
                code: error.error_code,
                message: error.error_msg,
            });
        }
        body.get_mut("response")
            .map(Value::take)
            .ok_or(UpstreamError::Missing("response"))
    }
}

#[async_trait]
impl PlatformClient for VkClient {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), UpstreamError> {
        let mut params = vec![("peer_id", message.peer_id.to_string())];
        if let Some(text) = &message.text {
            params.push(("message", text.clone()));
        }
        if let Some(forward) = &message.forward {
            params.push(("forward", serde_json::to_string(forward)?));
        }
        if let Some(attachment) = &message.attachment {
            params.push(("attachment", attachment.clone()));
        }
        params.push(("disable_mentions", "1".to_string()));
        params.push(("random_id", random_id().to_string()));

        self.call("messages.send", params).await?;
        debug!(peer_id = message.peer_id, "message sent");
        Ok(())
    }

    async fn conversation_members(
        &self,
        peer_id: i64,
    ) -> Result<Vec<ConversationMember>, UpstreamError> {
        let response = self
            .call(
                "messages.getConversationMembers",
                vec![("peer_id", peer_id.to_string())],
            )
            .await?;
        let members: ConversationMembers = serde_json::from_value(response)?;
        Ok(members.items)
    }

    async fn photo_upload_server(&self, peer_id: i64) -> Result<String, UpstreamError> {
        let response = self
            .call(
                "photos.getMessagesUploadServer",
                vec![("peer_id", peer_id.to_string())],
            )
            .await?;
        let server: UploadServer = serde_json::from_value(response)?;
        Ok(server.upload_url)
    }

    async fn upload_photo(
        &self,
        upload_url: &str,
        image: Vec<u8>,
    ) -> Result<UploadedPhoto, UpstreamError> {
        let file_name = format!("{}.png", chrono::Utc::now().timestamp_millis());
        let part = Part::bytes(image)
            .file_name(file_name)
            .mime_str("image/png")?;
        let form = Form::new().part("photo", part);

        let response = self.client.post(upload_url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        let uploaded: UploadedPhoto = serde_json::from_slice(&bytes)?;
        // The upload server answers 200 with an empty list when it rejected the file.
        if uploaded.photo.is_empty() || uploaded.photo == "[]" {
            return Err(UpstreamError::Missing("photo"));
        }
        Ok(uploaded)
    }

    async fn save_photo(&self, photo: &UploadedPhoto) -> Result<SavedPhoto, UpstreamError> {
        let response = self
            .call(
                "photos.saveMessagesPhoto",
                vec![
                    ("photo", photo.photo.clone()),
                    ("server", photo.server.to_string()),
                    ("hash", photo.hash.clone()),
                ],
            )
            .await?;
        let saved: Vec<SavedPhoto> = serde_json::from_value(response)?;
        saved
            .into_iter()
            .next()
            .ok_or(UpstreamError::Missing("saved photo"))
    }
}

/// Deduplication id the platform expects on every send; 31 random bits.
fn random_id() -> i64 {
    let (high, _) = Uuid::new_v4().as_u64_pair();
    (high >> 33) as i64
}
