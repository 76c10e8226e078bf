use async_trait::async_trait;
use tracing::debug;
use warden_contracts::EVENT_MESSAGE_NEW;

use crate::chain::{Context, Handler, Next};
use crate::error::DispatchError;

/// Head of every chain: only new, non-empty messages written by a person get
/// through. Community and bot authors have negative ids.
pub struct MessageFilter;

#[async_trait]
impl Handler for MessageFilter {
    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> Result<(), DispatchError> {
        if cx.envelope.kind != EVENT_MESSAGE_NEW {
            return Ok(());
        }
        let msg = cx.message()?;
        if msg.from_id < 0 {
            debug!(author_id = msg.from_id, "ignoring non-human author");
            return Ok(());
        }
        if msg.text().is_empty() {
            return Ok(());
        }
        next.run(cx).await
    }
}
