use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::info;
use warden_contracts::OutgoingMessage;

use crate::audit::{AuditJournal, AuditRecord, Outcome};
use crate::chain::{Context, Handler, Next};
use crate::error::DispatchError;

/// Set of conversations with a generation in flight.
///
/// Check-and-insert happens under one lock, so two concurrent callers for the
/// same key can never both get a permit. The key is released when the permit
/// drops, which covers errors, panics and cancelled futures alike.
#[derive(Default)]
pub struct ConcurrencyGuard {
    busy: Mutex<HashSet<i64>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` busy, or returns `None` if it already is.
    pub fn enter(&self, key: i64) -> Option<BusyPermit<'_>> {
        if !self.lock().insert(key) {
            return None;
        }
        Some(BusyPermit { guard: self, key })
    }

    pub fn is_busy(&self, key: i64) -> bool {
        self.lock().contains(&key)
    }

    #[cfg(test)]
    pub(crate) fn busy_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        // The set is always consistent between statements, so a poisoned lock
        // is safe to keep using.
        self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[must_use = "the key is released as soon as the permit is dropped"]
pub struct BusyPermit<'a> {
    guard: &'a ConcurrencyGuard,
    key: i64,
}

impl Drop for BusyPermit<'_> {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.key);
    }
}

/// Admits at most one in-flight generation per conversation. A second request
/// while one is running gets the busy reply and goes no further.
pub struct AntiSpam {
    guard: Arc<ConcurrencyGuard>,
    busy_message: String,
    audit: Option<Arc<AuditJournal>>,
}

impl AntiSpam {
    pub fn new(
        guard: Arc<ConcurrencyGuard>,
        busy_message: impl Into<String>,
        audit: Option<Arc<AuditJournal>>,
    ) -> Self {
        Self {
            guard,
            busy_message: busy_message.into(),
            audit,
        }
    }
}

#[async_trait]
impl Handler for AntiSpam {
    async fn handle(&self, cx: &Context<'_>, next: Next<'_>) -> Result<(), DispatchError> {
        let msg = cx.message()?;
        let Some(permit) = self.guard.enter(msg.peer_id) else {
            info!(peer_id = msg.peer_id, "generation already in flight");
            if let Some(audit) = &self.audit {
                let command = warden_kernel::command_token(msg.text());
                audit
                    .append(AuditRecord::new(msg, command, Outcome::RejectedBusy))
                    .await;
            }
            cx.platform
                .send_message(&OutgoingMessage::reply(msg, &self.busy_message))
                .await?;
            return Ok(());
        };

        let result = next.run(cx).await;
        drop(permit);
        result
    }
}
