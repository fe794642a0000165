use std::sync::OnceLock;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;

use crate::SharedRegistry;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum CycleOutcome {
    NoUpgradeNeeded,
    Deferred,
    Upgraded,
    Failed,
}

/// Where a new node image was obtained from.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ImageSource {
    Network,
    Registry,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabel {
    outcome: CycleOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SourceLabel {
    source: ImageSource,
}

#[derive(Clone, Debug, Default)]
pub struct UpgradeMetrics {
    /// Index of the phase the current cycle is in
    pub phase: Gauge,

    /// Consecutive cycles in which the node's status surface was unreachable
    pub unreachable_cycles: Gauge,

    cycles: Family<OutcomeLabel, Counter>,
    images: Family<SourceLabel, Counter>,
}

impl UpgradeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(registry: &SharedRegistry) -> Self {
        let metrics = Self::new();

        registry.component("upgrade", |registry| {
            registry.register(
                "phase",
                "Index of the phase the current cycle is in",
                metrics.phase.clone(),
            );

            registry.register(
                "unreachable_cycles",
                "Consecutive cycles in which the node's status surface was unreachable",
                metrics.unreachable_cycles.clone(),
            );

            registry.register(
                "cycles",
                "Upgrade cycles, by outcome",
                metrics.cycles.clone(),
            );

            registry.register(
                "images_fetched",
                "Node images fetched, by source",
                metrics.images.clone(),
            );
        });

        metrics
    }

    pub fn global() -> &'static Self {
        static METRICS: OnceLock<UpgradeMetrics> = OnceLock::new();
        METRICS.get_or_init(|| Self::register(SharedRegistry::global()))
    }

    pub fn record_cycle(&self, outcome: CycleOutcome) {
        self.cycles.get_or_create(&OutcomeLabel { outcome }).inc();
    }

    pub fn record_image(&self, source: ImageSource) {
        self.images.get_or_create(&SourceLabel { source }).inc();
    }

    pub fn cycles(&self, outcome: CycleOutcome) -> u64 {
        self.cycles.get_or_create(&OutcomeLabel { outcome }).get()
    }
}
