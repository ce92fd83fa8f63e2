//! Metric name constants and recording helpers

use std::time::Instant;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

pub const GENERATION_REQUEST_DURATION: &str = "generation.request.duration";
pub const GENERATION_REQUEST_COUNT: &str = "generation.request.count";
pub const GENERATION_POLL_ATTEMPTS: &str = "generation.poll.attempts";

/// Record the time elapsed since `start` on a histogram, in seconds
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[KeyValue]) {
    histogram.record(start.elapsed().as_secs_f64(), attributes);
}

/// Instruments recorded around every generation request
///
/// Instruments resolve against the global meter provider, so they become
/// no-ops when no exporter is configured.
#[derive(Clone)]
pub struct GenerationMetrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    poll_attempts: Histogram<u64>,
}

impl GenerationMetrics {
    pub fn new() -> Self {
        Self::from_meter(&opentelemetry::global::meter("foundry"))
    }

    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            duration: meter
                .f64_histogram(GENERATION_REQUEST_DURATION)
                .with_unit("s")
                .with_description("End-to-end duration of a generation request")
                .build(),
            requests: meter
                .u64_counter(GENERATION_REQUEST_COUNT)
                .with_description("Generation requests by provider and outcome")
                .build(),
            poll_attempts: meter
                .u64_histogram(GENERATION_POLL_ATTEMPTS)
                .with_description("Status requests issued per asynchronous job")
                .build(),
        }
    }

    /// Record a finished request; `outcome` is `"success"` or an error code
    pub fn record_request(&self, provider: &str, driver: &str, outcome: &str, start: Instant) {
        let attributes = [
            KeyValue::new("provider", provider.to_string()),
            KeyValue::new("driver", driver.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];

        record_duration(&self.duration, start, &attributes);
        self.requests.add(1, &attributes);
    }

    pub fn record_poll_attempts(&self, provider: &str, attempts: u32) {
        self.poll_attempts
            .record(u64::from(attempts), &[KeyValue::new("provider", provider.to_string())]);
    }
}

impl Default for GenerationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GenerationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationMetrics").finish_non_exhaustive()
    }
}
