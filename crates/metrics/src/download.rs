use std::sync::OnceLock;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;

use crate::SharedRegistry;

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum DownloadOutcome {
    Success,
    Failed,
    Unavailable,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabel {
    outcome: DownloadOutcome,
}

#[derive(Clone, Debug, Default)]
pub struct DownloadMetrics {
    /// Plaintext bytes written to disk
    pub bytes_written: Counter,

    /// Units of content decoded (decrypted or passed through)
    pub units_decoded: Counter,

    /// Object downloads, by outcome
    completed: Family<OutcomeLabel, Counter>,
}

impl DownloadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(registry: &SharedRegistry) -> Self {
        let metrics = Self::new();

        registry.component("download", |registry| {
            registry.register(
                "bytes_written",
                "Plaintext bytes written to disk",
                metrics.bytes_written.clone(),
            );

            registry.register(
                "units_decoded",
                "Units of content decoded",
                metrics.units_decoded.clone(),
            );

            registry.register(
                "completed",
                "Object downloads, by outcome",
                metrics.completed.clone(),
            );
        });

        metrics
    }

    /// Metrics registered once in the global registry.
    pub fn global() -> &'static Self {
        static METRICS: OnceLock<DownloadMetrics> = OnceLock::new();
        METRICS.get_or_init(|| Self::register(SharedRegistry::global()))
    }

    pub fn record(&self, outcome: DownloadOutcome) {
        self.completed.get_or_create(&OutcomeLabel { outcome }).inc();
    }

    pub fn completed(&self, outcome: DownloadOutcome) -> u64 {
        self.completed.get_or_create(&OutcomeLabel { outcome }).get()
    }
}
