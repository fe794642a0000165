use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use dcmanager_types::TransmitStatus;

/// Interval below which intermediate reports are dropped by [`Throttled`].
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Receives transfer progress.
///
/// Called inline by the writing stage, so implementations must return
/// quickly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, status: TransmitStatus, bytes: u64);
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn report(&self, status: TransmitStatus, bytes: u64) {
        (**self).report(status, bytes)
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for &S {
    fn report(&self, status: TransmitStatus, bytes: u64) {
        (**self).report(status, bytes)
    }
}

/// Discards every report.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _status: TransmitStatus, _bytes: u64) {}
}

/// Forwards at most one intermediate report per interval.
/// Terminal reports always pass and restart the interval.
#[derive(Debug)]
pub struct Throttled<S> {
    inner: S,
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl<S> Throttled<S> {
    pub fn new(inner: S) -> Self {
        Self::with_interval(inner, PROGRESS_INTERVAL)
    }

    pub fn with_interval(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ProgressSink> ProgressSink for Throttled<S> {
    fn report(&self, status: TransmitStatus, bytes: u64) {
        let now = Instant::now();

        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

            if status.is_terminal() {
                *last = None;
            } else {
                if last.is_some_and(|at| now.duration_since(at) < self.interval) {
                    return;
                }
                *last = Some(now);
            }
        }

        self.inner.report(status, bytes);
    }
}

/// Logs progress, with a percentage when the total size is known.
#[derive(Clone, Debug, Default)]
pub struct LogProgress {
    total: Option<u64>,
}

impl LogProgress {
    pub fn new(total: Option<u64>) -> Self {
        Self { total }
    }
}

impl ProgressSink for LogProgress {
    fn report(&self, status: TransmitStatus, bytes: u64) {
        match (status, self.total) {
            (TransmitStatus::Success, _) => info!(bytes, "Download complete"),
            (TransmitStatus::Failed, _) => info!(bytes, "Download failed"),
            (_, Some(total)) if total > 0 => {
                let percent = bytes as f64 * 100.0 / total as f64;
                info!(bytes, total, "Downloading... {percent:.2}% complete");
            }
            _ => info!(bytes, "Downloading..."),
        }
    }
}
