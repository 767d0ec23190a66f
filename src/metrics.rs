//! Prometheus instruments.
//!
//! All instruments live in a crate-owned registry so several forwarders (or
//! tests) in one process never collide on registration.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "finding_forwarder";

/// Label value for a successful delivery.
pub const STATUS_OK: &str = "ok";
/// Label value for a failed delivery.
pub const STATUS_FAIL: &str = "fail";

/// Metrics shared by every consumer and sender of one process.
pub struct Metrics {
    registry: Registry,
    sent_alerts: IntCounterVec,
    channel_latency: HistogramVec,
    store_errors: IntCounter,
    findings_received: IntCounterVec,
    last_block: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let build_info = IntCounterVec::new(
            Opts::new("build_info", "Build information").namespace(NAMESPACE),
            &["version"],
        )?;
        let sent_alerts = IntCounterVec::new(
            Opts::new("sent_alerts_total", "Finding deliveries by consumer and outcome")
                .namespace(NAMESPACE),
            &["consumer_name", "status"],
        )?;
        let channel_latency = HistogramVec::new(
            HistogramOpts::new(
                "channel_request_duration_seconds",
                "Outbound channel request latency",
            )
            .namespace(NAMESPACE)
            .buckets(prometheus::exponential_buckets(0.01, 2.0, 11)?),
            &["channel"],
        )?;
        let store_errors = IntCounter::with_opts(
            Opts::new(
                "coordination_store_errors_total",
                "Failed coordination store operations",
            )
            .namespace(NAMESPACE),
        )?;
        let findings_received = IntCounterVec::new(
            Opts::new("findings_received_total", "Findings decoded from the stream")
                .namespace(NAMESPACE),
            &["consumer_name"],
        )?;
        let last_block = IntGaugeVec::new(
            Opts::new("finding_block_number", "Block number of the latest finding")
                .namespace(NAMESPACE),
            &["consumer_name"],
        )?;

        registry.register(Box::new(build_info.clone()))?;
        registry.register(Box::new(sent_alerts.clone()))?;
        registry.register(Box::new(channel_latency.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(findings_received.clone()))?;
        registry.register(Box::new(last_block.clone()))?;

        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .inc();

        Ok(Self {
            registry,
            sent_alerts,
            channel_latency,
            store_errors,
            findings_received,
            last_block,
        })
    }

    /// Count one delivery outcome for a consumer.
    pub fn record_delivery(&self, consumer_name: &str, status: &str) {
        self.sent_alerts
            .with_label_values(&[consumer_name, status])
            .inc();
    }

    pub fn delivery_count(&self, consumer_name: &str, status: &str) -> u64 {
        self.sent_alerts
            .with_label_values(&[consumer_name, status])
            .get()
    }

    pub fn observe_channel_latency(&self, channel: &str, elapsed: Duration) {
        self.channel_latency
            .with_label_values(&[channel])
            .observe(elapsed.as_secs_f64());
    }

    pub fn channel_request_count(&self, channel: &str) -> u64 {
        self.channel_latency
            .with_label_values(&[channel])
            .get_sample_count()
    }

    pub fn record_store_error(&self) {
        self.store_errors.inc();
    }

    pub fn store_error_count(&self) -> u64 {
        self.store_errors.get()
    }

    pub fn record_finding(&self, consumer_name: &str, block_number: Option<u64>) {
        self.findings_received
            .with_label_values(&[consumer_name])
            .inc();
        if let Some(block) = block_number.and_then(|b| i64::try_from(b).ok()) {
            self.last_block.with_label_values(&[consumer_name]).set(block);
        }
    }

    /// Render the Prometheus text exposition.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
