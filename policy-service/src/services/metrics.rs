use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    policy_evaluations_total: IntCounterVec,
    transaction_transitions_total: IntCounterVec,
    policy_mutations_total: IntCounterVec,
    store_query_duration_seconds: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn register() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "path", "status"],
        )?;
        let policy_evaluations_total = IntCounterVec::new(
            Opts::new(
                "policy_evaluations_total",
                "Policy evaluations after an authentication attempt, by outcome",
            ),
            &["outcome"],
        )?;
        let transaction_transitions_total = IntCounterVec::new(
            Opts::new(
                "transaction_transitions_total",
                "Authentication transactions reaching a status",
            ),
            &["status"],
        )?;
        let policy_mutations_total = IntCounterVec::new(
            Opts::new(
                "policy_mutations_total",
                "Policy configuration mutations, real and simulated",
            ),
            &["operation", "dry_run"],
        )?;
        let store_query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "store_query_duration_seconds",
                "Storage query duration in seconds",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(policy_evaluations_total.clone()))?;
        registry.register(Box::new(transaction_transitions_total.clone()))?;
        registry.register(Box::new(policy_mutations_total.clone()))?;
        registry.register(Box::new(store_query_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            policy_evaluations_total,
            transaction_transitions_total,
            policy_mutations_total,
            store_query_duration_seconds,
        })
    }
}

/// Safe to call more than once; later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = Metrics::register()?;
    let _ = METRICS.set(metrics);
    Ok(())
}

pub fn record_http_request(method: &str, path: &str, status: &str, seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.http_requests_total
            .with_label_values(&[method, path, status])
            .inc();
        m.http_request_duration_seconds
            .with_label_values(&[method, path, status])
            .observe(seconds);
    }
}

pub fn record_evaluation(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.policy_evaluations_total
            .with_label_values(&[outcome])
            .inc();
    }
}

pub fn record_transition(status: &str) {
    if let Some(m) = METRICS.get() {
        m.transaction_transitions_total
            .with_label_values(&[status])
            .inc();
    }
}

pub fn record_mutation(operation: &str, dry_run: bool) {
    if let Some(m) = METRICS.get() {
        m.policy_mutations_total
            .with_label_values(&[operation, if dry_run { "true" } else { "false" }])
            .inc();
    }
}

/// Timer that records into `store_query_duration_seconds` when dropped.
pub fn observe_query(operation: &str) -> Option<HistogramTimer> {
    METRICS.get().map(|m| {
        m.store_query_duration_seconds
            .with_label_values(&[operation])
            .start_timer()
    })
}

pub fn get_metrics() -> String {
    let Some(metrics) = METRICS.get() else {
        return "# Metrics registry not initialized\n".to_string();
    };

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to UTF-8: {}", e);
        format!("# Failed to convert metrics to UTF-8: {}\n", e)
    })
}
