use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_MESSAGE_NEW: &str = "message_new";
pub const EVENT_CONFIRMATION: &str = "confirmation";

/// One inbound callback event, as delivered by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub group_id: i64,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(rename = "object", default)]
    pub payload: Value,
}

impl EventEnvelope {
    /// Decodes the chat message carried by a `message_new` payload.
    ///
    /// Returns `None` when the payload has no `message` object or it does not
    /// decode; callers treat that as a malformed event.
    pub fn message(&self) -> Option<Message> {
        let raw = self.payload.get("message")?;
        Message::deserialize(raw).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub peer_id: i64,
    pub from_id: i64,
    pub conversation_message_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_message: Option<ReplyMessage>,
}

impl Message {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyMessage {
    pub from_id: i64,
}

/// Reference to the messages a reply quotes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Forward {
    pub peer_id: i64,
    pub is_reply: bool,
    pub conversation_message_ids: Vec<i64>,
}

impl Forward {
    pub fn reply_to(msg: &Message) -> Self {
        Self {
            peer_id: msg.peer_id,
            is_reply: true,
            conversation_message_ids: vec![msg.conversation_message_id],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub peer_id: i64,
    pub text: Option<String>,
    pub forward: Option<Forward>,
    pub attachment: Option<String>,
}

impl OutgoingMessage {
    /// A text reply quoting `msg`.
    pub fn reply(msg: &Message, text: impl Into<String>) -> Self {
        Self {
            peer_id: msg.peer_id,
            text: Some(text.into()),
            forward: Some(Forward::reply_to(msg)),
            attachment: None,
        }
    }

    /// A reply quoting `msg` that carries only an attachment.
    pub fn attachment_reply(msg: &Message, attachment: impl Into<String>) -> Self {
        Self {
            peer_id: msg.peer_id,
            text: None,
            forward: Some(Forward::reply_to(msg)),
            attachment: Some(attachment.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformErrorBody {
    pub error_code: i64,
    #[serde(default)]
    pub error_msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMember {
    pub member_id: i64,
    #[serde(default)]
    pub is_owner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMembers {
    #[serde(default)]
    pub items: Vec<ConversationMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadServer {
    pub upload_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedPhoto {
    pub photo: String,
    pub server: i64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedPhoto {
    pub id: i64,
    pub owner_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest<'a> {
    pub prompt: &'a str,
    pub size: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub data: Vec<ImageDatum>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageDatum {
    #[serde(default)]
    pub url: Option<String>,
}
