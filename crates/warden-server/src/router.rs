use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use warden_contracts::OutgoingMessage;
use warden_kernel::{command_token, is_group_conversation};

use crate::chain::{Context, Handler, Next};
use crate::error::DispatchError;

/// Dispatches on the first word of the message.
///
/// In group conversations the author needs an allow record for that
/// conversation. Direct conversations are open to everyone and get the
/// unknown-command reply for tokens not in the table, unless the token carries
/// the internal prefix reserved for operator commands.
pub struct CommandRouter {
    routes: HashMap<String, Arc<dyn Handler>>,
    group_threshold: i64,
    unknown_command: String,
    internal_prefix: String,
}

impl CommandRouter {
    pub fn new(
        group_threshold: i64,
        unknown_command: impl Into<String>,
        internal_prefix: impl Into<String>,
    ) -> Self {
        Self {
            routes: HashMap::new(),
            group_threshold,
            unknown_command: unknown_command.into(),
            internal_prefix: internal_prefix.into(),
        }
    }

    pub fn route(mut self, command: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.routes.insert(command.into(), handler);
        self
    }
}

#[async_trait]
impl Handler for CommandRouter {
    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let command = command_token(msg.text());
        let group = is_group_conversation(msg.peer_id, self.group_threshold);

        let Some(target) = self.routes.get(command) else {
            if !group && !command.contains(self.internal_prefix.as_str()) {
                cx.platform
                    .send_message(&OutgoingMessage::reply(msg, &self.unknown_command))
                    .await?;
            }
            return Ok(());
        };

        if group
            && cx.store.find_allowed(msg.from_id, msg.peer_id).await? != Some(true)
        {
            debug!(
                peer_id = msg.peer_id,
                author_id = msg.from_id,
                command,
                "author not allowed in conversation"
            );
            return Ok(());
        }

        target.handle(cx, Next::end()).await?;
        next.run(cx).await
    }
}

/// Operator commands. Only answered in direct conversations, and only for
/// authors flagged privileged. Everything else is dropped without a reply.
pub struct AdminRouter {
    routes: HashMap<String, Arc<dyn Handler>>,
    group_threshold: i64,
}

impl AdminRouter {
    pub fn new(group_threshold: i64) -> Self {
        Self {
            routes: HashMap::new(),
            group_threshold,
        }
    }

    pub fn route(mut self, command: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.routes.insert(command.into(), handler);
        self
    }
}

#[async_trait]
impl Handler for AdminRouter {
    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        if is_group_conversation(msg.peer_id, self.group_threshold) {
            return Ok(());
        }
        let command = command_token(msg.text());
        let Some(target) = self.routes.get(command) else {
            return Ok(());
        };
        if cx.store.find_privileged(msg.from_id).await? != Some(true) {
            debug!(author_id = msg.from_id, command, "operator command from unprivileged author");
            return Ok(());
        }

        target.handle(cx, Next::end()).await?;
        next.run(cx).await
    }
}
