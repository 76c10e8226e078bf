use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use warden_config::Config;
use warden_contracts::EventEnvelope;

use crate::audit::AuditJournal;
use crate::chain::{Chain, Context, Handler};
use crate::commands::{
    AllowHandler, HelpHandler, InfoHandler, SetHelpTextHandler, SetOverrideCredentialHandler,
    SetSharedCredentialHandler,
};
use crate::error::DispatchError;
use crate::filter::MessageFilter;
use crate::generate::{GenerateHandler, GenerateSettings};
use crate::generation::GenerationClient;
use crate::guard::{AntiSpam, ConcurrencyGuard};
use crate::platform::PlatformClient;
use crate::queue::AdmissionQueue;
use crate::router::{AdminRouter, CommandRouter};
use crate::store::PermissionStore;

/// Owns the process-wide guard, the admission queue and the handler chains.
/// Every event walks all chains in order.
pub struct Dispatcher {
    chains: Vec<Chain>,
    platform: Arc<dyn PlatformClient>,
    store: Arc<dyn PermissionStore>,
    guard: Arc<ConcurrencyGuard>,
    queue: Arc<AdmissionQueue>,
}

impl Dispatcher {
    /// Builds the chains. Starts the queue clock, so it must run inside a tokio
    /// runtime.
    pub fn new(
        cfg: &Config,
        platform: Arc<dyn PlatformClient>,
        generation: Arc<dyn GenerationClient>,
        store: Arc<dyn PermissionStore>,
        audit: Option<Arc<AuditJournal>>,
    ) -> Self {
        let threshold = cfg.platform.group_peer_threshold;
        let commands = &cfg.commands;
        let messages = &cfg.messages;

        let guard = Arc::new(ConcurrencyGuard::new());
        let queue = Arc::new(AdmissionQueue::start(
            Duration::from_millis(cfg.queue.period_ms),
            cfg.queue.capacity,
        ));

        // Both generation commands share this chain and therefore one guard.
        let generate: Vec<Arc<dyn Handler>> = vec![
            Arc::new(AntiSpam::new(
                Arc::clone(&guard),
                messages.busy.clone(),
                audit.clone(),
            )),
            Arc::new(GenerateHandler::new(
                GenerateSettings::from_config(cfg),
                generation,
                Arc::clone(&queue),
                audit,
            )),
        ];
        let generate: Arc<dyn Handler> = Arc::new(Chain::new(generate));

        let public = CommandRouter::new(
            threshold,
            messages.unknown_command.clone(),
            commands.admin_prefix.clone(),
        )
        .route(commands.text.clone(), Arc::clone(&generate))
        .route(commands.image.clone(), generate)
        .route(commands.help.clone(), Arc::new(HelpHandler))
        .route(commands.info.clone(), Arc::new(InfoHandler));

        let admin = AdminRouter::new(threshold)
            .route(
                commands.set_help.clone(),
                Arc::new(SetHelpTextHandler::new(messages.done.clone())),
            )
            .route(
                commands.set_override.clone(),
                Arc::new(SetOverrideCredentialHandler),
            )
            .route(commands.set_shared.clone(), Arc::new(SetSharedCredentialHandler));

        let allow = AllowHandler::new(
            commands,
            threshold,
            cfg.owners.superusers.clone(),
            messages.done.clone(),
        );

        let chains = [
            Arc::new(public) as Arc<dyn Handler>,
            Arc::new(admin),
            Arc::new(allow),
        ]
        .into_iter()
        .map(|router| Chain::new(vec![Arc::new(MessageFilter) as Arc<dyn Handler>, router]))
        .collect();

        Self {
            chains,
            platform,
            store,
            guard,
            queue,
        }
    }

    /// Runs one event through every chain. A malformed event is dropped at
    /// once; any other failure is logged and ends only the chain it happened in.
    pub async fn dispatch(&self, envelope: &EventEnvelope) {
        let cx = Context::new(envelope, self.platform.as_ref(), self.store.as_ref());
        for (index, chain) in self.chains.iter().enumerate() {
            match chain.dispatch(&cx).await {
                Ok(()) => {}
                Err(DispatchError::Malformed(reason)) => {
                    debug!(event_id = ?envelope.event_id, reason, "dropping malformed event");
                    return;
                }
                Err(error) => {
                    warn!(chain = index, event_id = ?envelope.event_id, %error, "event dispatch failed");
                }
            }
        }
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }
}
