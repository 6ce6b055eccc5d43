//! Handler registry builder for the pushaas job kinds

use pushaas_models::CompletionPolicy;
use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::queue::{HandlerRegistry, JobKind, JobQueue};
use crate::store::InstanceStore;
use crate::worker::{CompletionRouting, DeprovisionHandler, ProvisionHandler, UpdateInstanceHandler};

/// Create a HandlerRegistry with all pushaas job handlers
///
/// # Example
///
/// ```rust,no_run
/// use pushaas_orchestrations::backend::MemoryBackend;
/// use pushaas_orchestrations::config::ProvisionerConfig;
/// use pushaas_orchestrations::orchestrator::Orchestrator;
/// use pushaas_orchestrations::queue::MemoryJobQueue;
/// use pushaas_orchestrations::registry::create_handler_registry;
/// use pushaas_orchestrations::store::MemoryInstanceStore;
/// use pushaas_orchestrations::worker::CompletionRouting;
/// use std::sync::Arc;
///
/// # fn example() -> anyhow::Result<()> {
/// let backend = Arc::new(MemoryBackend::new("pushaas.local"));
/// let orchestrator = Arc::new(Orchestrator::new(backend, ProvisionerConfig::local())?);
/// let registry = create_handler_registry(
///     orchestrator,
///     Arc::new(MemoryInstanceStore::new()),
///     Arc::new(MemoryJobQueue::new()),
///     CompletionRouting::Inline,
///     Default::default(),
/// );
/// # Ok(())
/// # }
/// ```
pub fn create_handler_registry(
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn InstanceStore>,
    queue: Arc<dyn JobQueue>,
    routing: CompletionRouting,
    policy: CompletionPolicy,
) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(
            JobKind::Provision,
            Arc::new(ProvisionHandler::new(
                orchestrator.clone(),
                store.clone(),
                queue,
                routing,
                policy,
            )),
        )
        .register(
            JobKind::Deprovision,
            Arc::new(DeprovisionHandler::new(orchestrator, store.clone())),
        )
        .register(
            JobKind::UpdateInstance,
            Arc::new(UpdateInstanceHandler::new(store, policy)),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::ProvisionerConfig;
    use crate::queue::MemoryJobQueue;
    use crate::store::MemoryInstanceStore;

    #[test]
    fn test_registry_covers_every_job_kind() {
        let backend = Arc::new(MemoryBackend::new("pushaas.local"));
        let orchestrator = Arc::new(Orchestrator::new(backend, ProvisionerConfig::local()).unwrap());

        let registry = create_handler_registry(
            orchestrator,
            Arc::new(MemoryInstanceStore::new()),
            Arc::new(MemoryJobQueue::new()),
            CompletionRouting::Inline,
            CompletionPolicy::LastWriteWins,
        );

        assert_eq!(registry.kinds(), JobKind::ALL.to_vec());
    }
}
