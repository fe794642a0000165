//! Prometheus metrics for downloads and upgrade cycles.

mod download;
mod registry;
mod serve;
mod upgrade;

pub use download::{DownloadMetrics, DownloadOutcome};
pub use registry::{Registry, SharedRegistry, NAMESPACE};
pub use serve::serve_metrics;
pub use upgrade::{CycleOutcome, ImageSource, UpgradeMetrics};

pub use prometheus_client::metrics::counter::Counter;
pub use prometheus_client::metrics::family::Family;
pub use prometheus_client::metrics::gauge::Gauge;

/// Encodes the global registry in the Prometheus text format.
pub fn export<W: core::fmt::Write>(writer: &mut W) -> core::fmt::Result {
    SharedRegistry::global().export(writer)
}
