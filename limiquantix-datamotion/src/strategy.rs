//! Data motion strategy selection.
//!
//! Strategies are a closed set of kinds ranked by the priority each one
//! reports for a given request. The highest priority wins; on a tie the
//! strategy registered first is used.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{DataMotionError, Result};
use crate::orchestrator::CompletionSignal;
use crate::types::{HostId, PoolId, ProviderId, VmDescriptor, VolumeId};

/// What a strategy is specialised for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Works with any storage
    Generic,
    /// Works only with pools served by one provider
    BackendSpecific(ProviderId),
}

/// How well a strategy fits a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StrategyPriority {
    CantHandle,
    Default,
    Hypervisor,
    Plugin,
    Highest,
}

/// Request to migrate a VM and its volumes to another host.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRequest {
    /// Source volume -> destination pool
    pub volumes: BTreeMap<VolumeId, PoolId>,
    pub vm: VmDescriptor,
    pub source_host: HostId,
    pub dest_host: HostId,
}

impl MigrationRequest {
    pub fn new(vm: VmDescriptor, source_host: HostId, dest_host: HostId) -> Self {
        Self {
            volumes: BTreeMap::new(),
            vm,
            source_host,
            dest_host,
        }
    }

    /// Move `volume` to `dest_pool`.
    pub fn with_volume(mut self, volume: VolumeId, dest_pool: PoolId) -> Self {
        self.volumes.insert(volume, dest_pool);
        self
    }
}

/// A way of moving volume data between pools and hosts.
#[async_trait]
pub trait DataMotionStrategy: Send + Sync {
    /// Kind of the strategy.
    fn kind(&self) -> StrategyKind;

    /// Priority for `request`; `CantHandle` declines it.
    async fn can_handle(&self, request: &MigrationRequest) -> StrategyPriority;

    /// Start a live migration.
    ///
    /// Precondition failures are returned directly; every later outcome
    /// is delivered through the returned signal.
    async fn migrate_volumes_and_vm(&self, request: MigrationRequest) -> Result<CompletionSignal>;
}

/// Picks the best registered strategy for a request.
#[derive(Default, Clone)]
pub struct StrategySelector {
    strategies: Vec<Arc<dyn DataMotionStrategy>>,
}

impl StrategySelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy. Earlier registrations win ties.
    pub fn register(&mut self, strategy: Arc<dyn DataMotionStrategy>) {
        info!(kind = ?strategy.kind(), "Registered data motion strategy");
        self.strategies.push(strategy);
    }

    /// Highest-priority strategy accepting `request`.
    pub async fn select(&self, request: &MigrationRequest) -> Result<Arc<dyn DataMotionStrategy>> {
        let mut best: Option<(StrategyPriority, &Arc<dyn DataMotionStrategy>)> = None;

        for strategy in &self.strategies {
            let priority = strategy.can_handle(request).await;
            debug!(kind = ?strategy.kind(), priority = ?priority, "Strategy evaluated");

            if priority == StrategyPriority::CantHandle {
                continue;
            }
            if best.map_or(true, |(p, _)| priority > p) {
                best = Some((priority, strategy));
            }
        }

        best.map(|(_, s)| s.clone()).ok_or_else(|| {
            DataMotionError::NoStrategy(format!(
                "vm {} with {} volume(s) from host {} to host {}",
                request.vm.instance_name,
                request.volumes.len(),
                request.source_host,
                request.dest_host
            ))
        })
    }

    /// Select a strategy and start the migration with it.
    #[instrument(skip(self, request), fields(vm = %request.vm.instance_name))]
    pub async fn migrate_volumes_and_vm(&self, request: MigrationRequest) -> Result<CompletionSignal> {
        let strategy = self.select(&request).await?;
        info!(kind = ?strategy.kind(), "Selected data motion strategy");
        strategy.migrate_volumes_and_vm(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MigrationResult;
    use crate::types::HypervisorType;

    struct FixedStrategy {
        kind: StrategyKind,
        priority: StrategyPriority,
        label: &'static str,
    }

    #[async_trait]
    impl DataMotionStrategy for FixedStrategy {
        fn kind(&self) -> StrategyKind {
            self.kind.clone()
        }

        async fn can_handle(&self, _request: &MigrationRequest) -> StrategyPriority {
            self.priority
        }

        async fn migrate_volumes_and_vm(&self, _request: MigrationRequest) -> Result<CompletionSignal> {
            let label = self.label;
            Ok(CompletionSignal::spawn(async move { MigrationResult::failed_with(label) }))
        }
    }

    fn request() -> MigrationRequest {
        MigrationRequest::new(VmDescriptor::new("i-2-10-VM", HypervisorType::Kvm), HostId(1), HostId(2))
            .with_volume(VolumeId(1), PoolId(2))
    }

    fn strategy(kind: StrategyKind, priority: StrategyPriority, label: &'static str) -> Arc<dyn DataMotionStrategy> {
        Arc::new(FixedStrategy { kind, priority, label })
    }

    #[tokio::test]
    async fn test_highest_priority_wins() {
        let mut selector = StrategySelector::new();
        selector.register(strategy(StrategyKind::Generic, StrategyPriority::Default, "generic"));
        selector.register(strategy(
            StrategyKind::BackendSpecific(ProviderId::new("StorPool")),
            StrategyPriority::Plugin,
            "storpool",
        ));

        let chosen = selector.select(&request()).await.unwrap();
        assert_eq!(chosen.kind(), StrategyKind::BackendSpecific(ProviderId::new("StorPool")));

        let result = selector.migrate_volumes_and_vm(request()).await.unwrap().wait().await;
        assert_eq!(result.details.as_deref(), Some("storpool"));
    }

    #[tokio::test]
    async fn test_tie_goes_to_first_registered() {
        let mut selector = StrategySelector::new();
        selector.register(strategy(StrategyKind::Generic, StrategyPriority::Default, "first"));
        selector.register(strategy(StrategyKind::Generic, StrategyPriority::Default, "second"));

        let result = selector.migrate_volumes_and_vm(request()).await.unwrap().wait().await;
        assert_eq!(result.details.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_no_strategy() {
        let mut selector = StrategySelector::new();
        selector.register(strategy(StrategyKind::Generic, StrategyPriority::CantHandle, "never"));

        let err = selector.select(&request()).await.err().unwrap();
        assert!(matches!(err, DataMotionError::NoStrategy(_)));
        assert!(err.is_precondition());
    }
}
