//! Small command handlers: help and info replies, operator settings and the
//! per-conversation allow list.

use async_trait::async_trait;
use tracing::info;
use warden_contracts::OutgoingMessage;
use warden_kernel::{argument_tail, is_group_conversation, word, word_count};

use crate::chain::{Context, Handler, Next};
use crate::error::DispatchError;

pub struct HelpHandler;

#[async_trait]
impl Handler for HelpHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let help = cx.store.find_help_text().await?;
        cx.platform
            .send_message(&OutgoingMessage::reply(msg, help))
            .await?;
        Ok(())
    }
}

/// Replies with the conversation id, which operators need to grant an
/// override credential.
pub struct InfoHandler;

#[async_trait]
impl Handler for InfoHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        cx.platform
            .send_message(&OutgoingMessage::reply(msg, msg.peer_id.to_string()))
            .await?;
        Ok(())
    }
}

/// `<command> <text...>`: everything after the command becomes the help text.
pub struct SetHelpTextHandler {
    done: String,
}

impl SetHelpTextHandler {
    pub fn new(done: impl Into<String>) -> Self {
        Self { done: done.into() }
    }
}

#[async_trait]
impl Handler for SetHelpTextHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let Some(text) = argument_tail(msg.text()) else {
            return Ok(());
        };
        cx.store.set_help_text(text).await?;
        info!(author_id = msg.from_id, "help text replaced");
        cx.platform
            .send_message(&OutgoingMessage::reply(msg, &self.done))
            .await?;
        Ok(())
    }
}

/// `<command> <credential>`
pub struct SetSharedCredentialHandler;

#[async_trait]
impl Handler for SetSharedCredentialHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let credential = match word(msg.text(), 1) {
            Some(w) if !w.is_empty() => w,
            _ => return Ok(()),
        };
        cx.store.set_shared_credential(credential).await?;
        info!(author_id = msg.from_id, "shared credential replaced");
        cx.platform
            .send_message(&OutgoingMessage::reply(msg, "Public token changed."))
            .await?;
        Ok(())
    }
}

/// `<command> <peer_id> <credential|null>`
pub struct SetOverrideCredentialHandler;

#[async_trait]
impl Handler for SetOverrideCredentialHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let text = msg.text();
        if word_count(text) < 3 {
            return Ok(());
        }
        let target = word(text, 1)
            .and_then(|w| w.parse::<i64>().ok())
            .unwrap_or(0);
        if target == 0 {
            return Ok(());
        }
        let credential = match word(text, 2) {
            Some("null") => None,
            Some(w) if !w.is_empty() => Some(w),
            _ => return Ok(()),
        };

        cx.store.set_override_credential(target, credential).await?;
        info!(
            author_id = msg.from_id,
            peer_id = target,
            cleared = credential.is_none(),
            "override credential changed"
        );
        cx.platform
            .send_message(&OutgoingMessage::reply(
                msg,
                format!("Custom token of {target} changed."),
            ))
            .await?;
        Ok(())
    }
}

/// Grants or revokes command access in a group conversation. Only the
/// conversation owner or a configured superuser may do this. The target is the
/// author of the quoted message, or the caller when nothing is quoted.
pub struct AllowHandler {
    allow: String,
    disallow: String,
    group_threshold: i64,
    superusers: Vec<i64>,
    done: String,
}

impl AllowHandler {
    pub fn new(
        commands: &warden_config::Commands,
        group_threshold: i64,
        superusers: Vec<i64>,
        done: impl Into<String>,
    ) -> Self {
        Self {
            allow: commands.allow.clone(),
            disallow: commands.disallow.clone(),
            group_threshold,
            superusers,
            done: done.into(),
        }
    }
}

#[async_trait]
impl Handler for AllowHandler {
    async fn handle(&self, cx: &Context<'_>, _next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        if !is_group_conversation(msg.peer_id, self.group_threshold) {
            return Ok(());
        }
        let allowed = if msg.text() == self.allow {
            true
        } else if msg.text() == self.disallow {
            false
        } else {
            return Ok(());
        };

        if !self.superusers.contains(&msg.from_id) {
            let members = cx.platform.conversation_members(msg.peer_id).await?;
            let owner = members
                .iter()
                .any(|m| m.is_owner && m.member_id == msg.from_id);
            if !owner {
                return Ok(());
            }
        }

        let target = msg
            .reply_message
            .as_ref()
            .map_or(msg.from_id, |reply| reply.from_id);
        if target < 0 {
            return Ok(());
        }

        cx.store.set_allowed(target, msg.peer_id, allowed).await?;
        info!(
            peer_id = msg.peer_id,
            author_id = msg.from_id,
            target,
            allowed,
            "conversation access changed"
        );
        cx.platform
            .send_message(&OutgoingMessage::reply(msg, &self.done))
            .await?;
        Ok(())
    }
}
