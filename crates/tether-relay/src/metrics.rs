use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, register_histogram_with_registry,
    Counter, Gauge, Histogram, Registry,
};
use std::sync::Arc;

pub struct RelayMetrics {
    pub online_hosts: Gauge,
    pub open_sessions: Gauge,
    pub requests_submitted: Counter,
    pub requests_completed: Counter,
    pub requests_failed: Counter,
    pub insert_conflicts: Counter,
    pub records_swept: Counter,
    pub request_latency: Histogram,
    pub registry: Arc<Registry>,
}

impl RelayMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let online_hosts = register_gauge_with_registry!(
            "tether_relay_online_hosts",
            "Number of hosts currently marked online",
            registry
        )?;

        let open_sessions = register_gauge_with_registry!(
            "tether_relay_open_sessions",
            "Number of unconsumed pairing sessions",
            registry
        )?;

        let requests_submitted = register_counter_with_registry!(
            "tether_relay_requests_submitted_total",
            "Total number of command requests accepted",
            registry
        )?;

        let requests_completed = register_counter_with_registry!(
            "tether_relay_requests_completed_total",
            "Total number of command requests completed",
            registry
        )?;

        let requests_failed = register_counter_with_registry!(
            "tether_relay_requests_failed_total",
            "Total number of command requests failed",
            registry
        )?;

        let insert_conflicts = register_counter_with_registry!(
            "tether_relay_insert_conflicts_total",
            "Total number of inserts rejected for a duplicate id",
            registry
        )?;

        let records_swept = register_counter_with_registry!(
            "tether_relay_records_swept_total",
            "Total number of records removed by the background sweep",
            registry
        )?;

        let request_latency = register_histogram_with_registry!(
            "tether_relay_request_latency_seconds",
            "Request latency in seconds",
            registry
        )?;

        Ok(Self {
            online_hosts,
            open_sessions,
            requests_submitted,
            requests_completed,
            requests_failed,
            insert_conflicts,
            records_swept,
            request_latency,
            registry,
        })
    }

    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new().unwrap()
    }
}
