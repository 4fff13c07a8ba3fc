//! Stats handler pushing connection-count samples to the metrics recorder.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::{metrics, ports::StatsHandler};

/// Records each connection-count sample as a per-listener gauge.
pub struct MetricsStatsHandler {
    listener: String,
    running: AtomicBool,
}

impl MetricsStatsHandler {
    pub fn new(listener: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            running: AtomicBool::new(false),
        }
    }
}

impl StatsHandler for MetricsStatsHandler {
    fn start(&self) {
        self.running.store(true, Ordering::Release);
        debug!(listener = %self.listener, "Stats handler started");
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        metrics::set_active_clients(&self.listener, 0);
        debug!(listener = %self.listener, "Stats handler stopped");
    }

    fn connections(&self, count: usize) {
        // Samples may still arrive from unwinding handlers after stop.
        if self.running.load(Ordering::Acquire) {
            metrics::set_active_clients(&self.listener, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_ignored_when_stopped() {
        let handler = MetricsStatsHandler::new("test");
        handler.connections(3); // no recorder installed, must not panic

        handler.start();
        handler.connections(5);
        handler.stop();
        handler.connections(7);
    }
}
