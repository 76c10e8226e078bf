//! Text and image generation for a single request.
//!
//! A conversation with its own override credential calls the generation
//! service directly. Everyone else shares one credential, so their calls go
//! through the admission queue and the author is told their position. Only the
//! generation call itself is queued; downloading and re-uploading an image
//! result happens afterwards on the request's own task.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use warden_contracts::{Message, OutgoingMessage};
use warden_kernel::{
    argument_tail, command_token, photo_attachment, prompt_length, queue_position_message,
};

use crate::audit::{AuditJournal, AuditRecord, Outcome, Route};
use crate::chain::{Context, Handler, Next};
use crate::error::{DispatchError, UpstreamError};
use crate::generation::GenerationClient;
use crate::queue::AdmissionQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Text,
    Image,
}

#[derive(Debug, Clone)]
pub struct GenerateSettings {
    pub text_command: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_prompt_length: usize,
    pub messages: warden_config::Messages,
}

impl GenerateSettings {
    pub fn from_config(cfg: &warden_config::Config) -> Self {
        Self {
            text_command: cfg.commands.text.clone(),
            model: cfg.generation.model.clone(),
            max_tokens: cfg.generation.max_tokens,
            max_prompt_length: cfg.limits.max_prompt_length,
            messages: cfg.messages.clone(),
        }
    }
}

/// One outbound generation call, owned so it can wait in the queue.
struct GenerationRequest {
    kind: GenerationKind,
    credential: String,
    prompt: String,
    model: String,
    max_tokens: u32,
}

impl GenerationRequest {
    /// Completion text for `Text`, the asset URL for `Image`.
    async fn run(self, client: Arc<dyn GenerationClient>) -> Result<String, UpstreamError> {
        match self.kind {
            GenerationKind::Text => {
                client
                    .complete(&self.credential, &self.prompt, self.max_tokens, &self.model)
                    .await
            }
            GenerationKind::Image => client.generate_image(&self.credential, &self.prompt).await,
        }
    }
}

pub struct GenerateHandler {
    settings: GenerateSettings,
    generation: Arc<dyn GenerationClient>,
    queue: Arc<AdmissionQueue>,
    audit: Option<Arc<AuditJournal>>,
}

impl GenerateHandler {
    pub fn new(
        settings: GenerateSettings,
        generation: Arc<dyn GenerationClient>,
        queue: Arc<AdmissionQueue>,
        audit: Option<Arc<AuditJournal>>,
    ) -> Self {
        Self {
            settings,
            generation,
            queue,
            audit,
        }
    }

    async fn record(&self, rec: AuditRecord) {
        if let Some(audit) = &self.audit {
            audit.append(rec).await;
        }
    }

    async fn reply(&self, cx: &Context<'_>, msg: &Message, text: &str) -> Result<(), DispatchError> {
        cx.platform
            .send_message(&OutgoingMessage::reply(msg, text))
            .await?;
        Ok(())
    }

    /// Turns a successful generation into the reply. For images this downloads
    /// the asset and moves it onto the platform; any failing step fails the
    /// whole reply.
    async fn compose(
        &self,
        cx: &Context<'_>,
        msg: &Message,
        kind: GenerationKind,
        output: String,
    ) -> Result<OutgoingMessage, UpstreamError> {
        match kind {
            GenerationKind::Text => Ok(OutgoingMessage::reply(msg, output)),
            GenerationKind::Image => {
                let image = self.generation.fetch_asset(&output).await?;
                let upload_url = cx.platform.photo_upload_server(msg.peer_id).await?;
                let uploaded = cx.platform.upload_photo(&upload_url, image).await?;
                let saved = cx.platform.save_photo(&uploaded).await?;
                Ok(OutgoingMessage::attachment_reply(
                    msg,
                    photo_attachment(saved.owner_id, saved.id),
                ))
            }
        }
    }
}

#[async_trait]
impl Handler for GenerateHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let text = msg.text();
        let command = command_token(text);
        let kind = if command == self.settings.text_command {
            GenerationKind::Text
        } else {
            GenerationKind::Image
        };

        if kind == GenerationKind::Text && prompt_length(text) > self.settings.max_prompt_length {
            self.record(AuditRecord::new(msg, command, Outcome::PromptTooLong))
                .await;
            return self
                .reply(cx, msg, &self.settings.messages.prompt_too_long)
                .await;
        }
        let Some(prompt) = argument_tail(text) else {
            return Ok(());
        };

        let override_credential = cx.store.find_override_credential(msg.peer_id).await?;
        let route = if override_credential.is_some() {
            Route::Direct
        } else {
            Route::Queued
        };
        let request = GenerationRequest {
            kind,
            credential: match override_credential {
                Some(credential) => credential,
                None => cx.store.find_shared_credential().await?,
            },
            prompt: prompt.to_string(),
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
        };

        let result = match route {
            Route::Direct => request.run(Arc::clone(&self.generation)).await,
            Route::Queued => {
                let admitted = self
                    .queue
                    .submit_with_result(request.run(Arc::clone(&self.generation)));
                let admission = match admitted {
                    Ok(admission) => admission,
                    Err(full) => {
                        info!(peer_id = msg.peer_id, capacity = full.capacity, "admission queue full");
                        self.record(
                            AuditRecord::new(msg, command, Outcome::RejectedFull)
                                .with_route(Route::Queued),
                        )
                        .await;
                        return self.reply(cx, msg, &self.settings.messages.queue_full).await;
                    }
                };
                let position =
                    queue_position_message(&self.settings.messages.queue_position, admission.position);
                // The job is already queued, so the permit is held until it finishes.
                if let Err(error) = self.reply(cx, msg, &position).await {
                    warn!(peer_id = msg.peer_id, %error, "queue position reply failed");
                }
                admission.outcome().await
            }
        };

        let reply = match result {
            Ok(output) => self.compose(cx, msg, kind, output).await,
            Err(error) => Err(error),
        };
        match reply {
            Ok(out) => {
                if let Err(error) = cx.platform.send_message(&out).await {
                    self.record(
                        AuditRecord::new(msg, command, Outcome::CompletedFailure)
                            .with_route(route)
                            .with_detail(format!("reply not delivered: {error}")),
                    )
                    .await;
                    return Err(error.into());
                }
                self.record(AuditRecord::new(msg, command, Outcome::CompletedSuccess).with_route(route))
                    .await;
            }
            Err(error) => {
                warn!(peer_id = msg.peer_id, command, ?route, %error, "generation failed");
                self.record(
                    AuditRecord::new(msg, command, Outcome::CompletedFailure)
                        .with_route(route)
                        .with_detail(error.to_string()),
                )
                .await;
                self.reply(cx, msg, &self.settings.messages.generic_error)
                    .await?;
            }
        }
        Ok(())
    }
}
