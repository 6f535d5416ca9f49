//! Application metrics: queue depth and the queued/dropped/replaced counters, exported as
//! `opentelemetry` instruments built from a shared `Meter`, backed by a Prometheus registry
//! since this repo has no OTLP collector of its own to ship metrics to.

use std::collections::HashMap;
use std::sync::Mutex;

use opentelemetry::metrics::{Counter, Meter, UpDownCounter};
use prometheus::{Encoder, Registry, TextEncoder};
use trakbridge_core::queue::QueueStats;

/// Installs a Prometheus-backed `opentelemetry` meter provider as the process's global meter
/// provider, and returns the registry a `/metrics` endpoint (left to the deployment to wire up;
/// out of scope here) would scrape.
pub fn install() -> anyhow::Result<Registry> {
    let registry = Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(exporter)
        .build();
    opentelemetry::global::set_meter_provider(provider);
    Ok(registry)
}

/// Renders the current metric values as Prometheus text exposition format.
pub fn render(registry: &Registry) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[derive(Default, Clone, Copy)]
struct LastTotals {
    queued: u64,
    dropped: u64,
    replaced: u64,
    depth: i64,
}

/// Per-destination queue instruments, recorded by the monitoring task alongside its log lines.
///
/// `depth` is modeled as an `UpDownCounter` rather than a synchronous gauge instrument (not yet
/// part of the `opentelemetry` version this workspace pins): each tick records the delta between
/// the newly-observed queue size and the last-observed one, which nets out to the same running
/// value a gauge would report.
pub struct QueueMetrics {
    depth: UpDownCounter<i64>,
    queued_total: Counter<u64>,
    dropped_total: Counter<u64>,
    replaced_total: Counter<u64>,
    /// `QueueStats`' counters are cumulative since the queue was created, but `Counter::add`
    /// takes a delta to add — recording the running total directly on every tick would sum the
    /// same events over and over. This tracks the last-observed total per destination so only
    /// the delta since the previous tick is added.
    last_totals: Mutex<HashMap<String, LastTotals>>,
}

impl QueueMetrics {
    pub fn new(meter: &Meter) -> Self {
        QueueMetrics {
            depth: meter
                .i64_up_down_counter("trakbridge_queue_depth")
                .with_description("Current number of events waiting in a destination's queue")
                .init(),
            queued_total: meter
                .u64_counter("trakbridge_queue_events_queued_total")
                .with_description("Events accepted into a destination's queue")
                .init(),
            dropped_total: meter
                .u64_counter("trakbridge_queue_events_dropped_total")
                .with_description("Events dropped by a destination's overflow policy")
                .init(),
            replaced_total: meter
                .u64_counter("trakbridge_queue_events_replaced_total")
                .with_description("Events replaced by a newer fix for the same device")
                .init(),
            last_totals: Mutex::new(HashMap::new()),
        }
    }

    /// Records one destination's point-in-time [`QueueStats`].
    pub fn record(&self, destination: &str, stats: &QueueStats) {
        let attributes = [opentelemetry::KeyValue::new("destination", destination.to_string())];

        let mut last_totals = self.last_totals.lock().expect("metrics mutex poisoned");
        let last = last_totals.entry(destination.to_string()).or_default();

        self.depth.add(stats.size as i64 - last.depth, &attributes);
        self.queued_total
            .add(stats.events_queued_total.saturating_sub(last.queued), &attributes);
        self.dropped_total
            .add(stats.events_dropped_total.saturating_sub(last.dropped), &attributes);
        self.replaced_total
            .add(stats.events_replaced_total.saturating_sub(last.replaced), &attributes);
        *last = LastTotals {
            queued: stats.events_queued_total,
            dropped: stats.events_dropped_total,
            replaced: stats.events_replaced_total,
            depth: stats.size as i64,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stats(queued: u64, dropped: u64, replaced: u64) -> QueueStats {
        QueueStats {
            size: 0,
            events_queued_total: queued,
            events_dropped_total: dropped,
            events_replaced_total: replaced,
            last_enqueue_time: Some(Utc::now()),
        }
    }

    #[test]
    fn repeated_record_calls_add_only_the_delta() {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();
        let meter = provider.meter("test");
        let metrics = QueueMetrics::new(&meter);

        metrics.record("s1", &stats(10, 1, 2));
        metrics.record("s1", &stats(10, 1, 2));
        metrics.record("s1", &stats(15, 1, 3));

        let rendered = render(&registry).unwrap();
        assert!(rendered.contains("trakbridge_queue_events_queued_total"));
    }
}
