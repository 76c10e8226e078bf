use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use warden_config::{Config, Generation, Platform, Server, Store, StoreSeed};
use warden_contracts::{
    ConversationMember, EventEnvelope, OutgoingMessage, SavedPhoto, UploadedPhoto,
};

use crate::error::UpstreamError;
use crate::generation::GenerationClient;
use crate::platform::PlatformClient;

/// In-memory config with a seeded store: privileged user 1, help text
/// `help text` and shared credential `sk-shared`.
pub(crate) fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        platform: Platform {
            api_base: "http://platform.invalid/method".to_string(),
            api_version: "5.131".to_string(),
            access_token: "vk-token".to_string(),
            group_id: 1,
            secret: "s".to_string(),
            confirmation: "c0nf1rm".to_string(),
            request_timeout_ms: 1_000,
            group_peer_threshold: 2_000_000_000,
        },
        generation: Generation {
            api_base: "http://generation.invalid/v1".to_string(),
            model: "text-davinci-003".to_string(),
            max_tokens: 1000,
            image_size: "512x512".to_string(),
            request_timeout_ms: 1_000,
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
            seed: StoreSeed {
                shared_credential: Some("sk-shared".to_string()),
                help_text: Some("help text".to_string()),
                privileged_users: vec![1],
            },
        },
        queue: Default::default(),
        limits: Default::default(),
        commands: Default::default(),
        messages: Default::default(),
        owners: Default::default(),
        audit: Default::default(),
        logging: Default::default(),
    }
}

pub(crate) fn message_event(peer_id: i64, from_id: i64, text: &str) -> EventEnvelope {
    serde_json::from_value(json!({
        "type": "message_new",
        "group_id": 1,
        "secret": "s",
        "object": {
            "message": {
                "peer_id": peer_id,
                "from_id": from_id,
                "conversation_message_id": 100,
                "text": text,
            }
        }
    }))
    .unwrap()
}

pub(crate) fn reply_event(peer_id: i64, from_id: i64, text: &str, reply_from: i64) -> EventEnvelope {
    let mut env = message_event(peer_id, from_id, text);
    env.payload["message"]["reply_message"] = json!({ "from_id": reply_from });
    env
}

/// Photo steps a [`FakePlatform`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhotoStep {
    UploadServer,
    Upload,
    Save,
}

#[derive(Default)]
pub(crate) struct FakePlatform {
    pub failing_step: Option<PhotoStep>,
    pub members: Vec<ConversationMember>,
    failing_sends: AtomicUsize,
    sent: Mutex<Vec<OutgoingMessage>>,
}

impl FakePlatform {
    pub fn with_members(members: Vec<ConversationMember>) -> Self {
        Self {
            members,
            ..Self::default()
        }
    }

    pub fn failing_at(step: PhotoStep) -> Self {
        Self {
            failing_step: Some(step),
            ..Self::default()
        }
    }

    /// The first `count` sends fail and are not recorded.
    pub fn failing_first_sends(count: usize) -> Self {
        Self {
            failing_sends: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| m.text)
            .collect()
    }

    fn check(&self, step: PhotoStep) -> Result<(), UpstreamError> {
        if self.failing_step == Some(step) {
            return Err(UpstreamError::Api {
                code: 15,
                message: "Access denied".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), UpstreamError> {
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(UpstreamError::Api {
                code: 10,
                message: "Internal server error".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn conversation_members(
        &self,
        _peer_id: i64,
    ) -> Result<Vec<ConversationMember>, UpstreamError> {
        Ok(self.members.clone())
    }

    async fn photo_upload_server(&self, _peer_id: i64) -> Result<String, UpstreamError> {
        self.check(PhotoStep::UploadServer)?;
        Ok("http://upload.invalid/photo".to_string())
    }

    async fn upload_photo(
        &self,
        _upload_url: &str,
        _image: Vec<u8>,
    ) -> Result<UploadedPhoto, UpstreamError> {
        self.check(PhotoStep::Upload)?;
        Ok(UploadedPhoto {
            photo: "[{\"photo\":\"abc\"}]".to_string(),
            server: 840,
            hash: "9f1c".to_string(),
        })
    }

    async fn save_photo(&self, _photo: &UploadedPhoto) -> Result<SavedPhoto, UpstreamError> {
        self.check(PhotoStep::Save)?;
        Ok(SavedPhoto {
            id: 457239017,
            owner_id: -218000000,
        })
    }
}

pub(crate) struct FakeGeneration {
    pub completion: Option<String>,
    pub image_url: Option<String>,
    pub fail_fetch: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for FakeGeneration {
    fn default() -> Self {
        Self {
            completion: Some("generated text".to_string()),
            image_url: Some("http://assets.invalid/1.png".to_string()),
            fail_fetch: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGeneration {
    /// Every generation call succeeds at transport level but carries no result.
    pub fn empty() -> Self {
        Self {
            completion: None,
            image_url: None,
            ..Self::default()
        }
    }

    /// Generation succeeds but the produced asset cannot be downloaded.
    pub fn unreachable_asset() -> Self {
        Self {
            fail_fetch: true,
            ..Self::default()
        }
    }

    /// `(credential, prompt)` for every generation call, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for FakeGeneration {
    async fn complete(
        &self,
        credential: &str,
        prompt: &str,
        _max_tokens: u32,
        _model: &str,
    ) -> Result<String, UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.to_string(), prompt.to_string()));
        self.completion
            .clone()
            .ok_or(UpstreamError::Missing("choices[0].text"))
    }

    async fn generate_image(&self, credential: &str, prompt: &str) -> Result<String, UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.to_string(), prompt.to_string()));
        self.image_url
            .clone()
            .ok_or(UpstreamError::Missing("data[0].url"))
    }

    async fn fetch_asset(&self, _url: &str) -> Result<Vec<u8>, UpstreamError> {
        if self.fail_fetch {
            return Err(UpstreamError::Status {
                status: 404,
                body: "not found".to_string(),
            });
        }
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }
}
