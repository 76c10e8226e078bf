//! Chain-of-responsibility over an immutable handler list.
//!
//! A [`Chain`] is built once at startup and shared by every concurrent
//! dispatch. Each handler receives a [`Next`] cursor over the handlers that
//! follow it; continuing the chain means calling [`Next::run`], stopping it
//! means returning without doing so. The cursor walks a slice by position, so
//! no handler holds a mutable link to its successor and per-event state only
//! lives inside the running future.

use std::sync::Arc;

use async_trait::async_trait;
use warden_contracts::{EventEnvelope, Message};

use crate::error::DispatchError;
use crate::platform::PlatformClient;
use crate::store::PermissionStore;

/// Everything a handler may touch for one event.
pub struct Context<'a> {
    pub envelope: &'a EventEnvelope,
    pub platform: &'a dyn PlatformClient,
    pub store: &'a dyn PermissionStore,
    message: Option<Message>,
}

impl<'a> Context<'a> {
    pub fn new(
        envelope: &'a EventEnvelope,
        platform: &'a dyn PlatformClient,
        store: &'a dyn PermissionStore,
    ) -> Self {
        Self {
            envelope,
            platform,
            store,
            message: envelope.message(),
        }
    }

    /// The decoded chat message. Handlers behind the message filter may rely on
    /// it; anywhere else a missing message drops the event.
    pub fn message(&self) -> Result<&Message, DispatchError> {
        self.message
            .as_ref()
            .ok_or(DispatchError::Malformed("payload carries no decodable message"))
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> Result<(), DispatchError>;
}

/// Cursor over the handlers after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Handler>],
}

impl<'a> Next<'a> {
    /// A cursor with nothing after it; used when a handler is invoked on its own.
    pub fn end() -> Self {
        Self { rest: &[] }
    }

    pub async fn run(self, cx: &Context<'_>) -> Result<(), DispatchError> {
        match self.rest.split_first() {
            Some((head, tail)) => head.handle(cx, Next { rest: tail }).await,
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub struct Chain {
    handlers: Arc<[Arc<dyn Handler>]>,
}

impl Chain {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    pub async fn dispatch(&self, cx: &Context<'_>) -> Result<(), DispatchError> {
        Next {
            rest: &self.handlers,
        }
        .run(cx)
        .await
    }
}

/// A chain used as a command target runs to its own end, then hands over to
/// the caller's continuation.
#[async_trait]
impl Handler for Chain {
    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> Result<(), DispatchError> {
        self.dispatch(cx).await?;
        next.run(cx).await
    }
}
