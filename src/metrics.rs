//! Prometheus metrics, registered on a dedicated `Registry` (not the process-global
//! default) so the `/metrics` handler only ever reports what this service owns.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref TRANSACTIONS_POSTED: CounterVec = CounterVec::new(
        prometheus::opts!(
            "bank_transactions_posted_total",
            "Total ledger transactions posted, by outcome"
        ),
        &["outcome"]
    )
    .expect("constant metric name is valid");

    pub static ref TRANSACTION_LATENCY: HistogramVec = HistogramVec::new(
        prometheus::histogram_opts!(
            "bank_transaction_latency_seconds",
            "Time to post a ledger transaction",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
        ),
        &["outcome"]
    )
    .expect("constant metric name is valid");

    pub static ref CHALLENGE_OUTCOMES: IntCounterVec = IntCounterVec::new(
        prometheus::opts!(
            "bank_challenge_outcomes_total",
            "TAN challenge attempt outcomes"
        ),
        &["outcome"]
    )
    .expect("constant metric name is valid");

    pub static ref WITHDRAWAL_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        prometheus::opts!(
            "bank_withdrawal_transitions_total",
            "Withdrawal FSM transitions"
        ),
        &["to_state"]
    )
    .expect("constant metric name is valid");

    pub static ref CASHOUT_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        prometheus::opts!(
            "bank_cashout_transitions_total",
            "Cashout FSM transitions"
        ),
        &["to_state"]
    )
    .expect("constant metric name is valid");

    pub static ref GC_ROWS_SWEPT: IntCounterVec = IntCounterVec::new(
        prometheus::opts!("bank_gc_rows_swept_total", "Rows removed by the GC sweep"),
        &["table"]
    )
    .expect("constant metric name is valid");

    pub static ref LONG_POLL_WAITERS: IntGauge =
        IntGauge::new("bank_long_poll_waiters", "Active long-polling requests")
            .expect("constant metric name is valid");

    pub static ref HTTP_REQUEST_LATENCY: HistogramVec = HistogramVec::new(
        prometheus::histogram_opts!(
            "bank_http_request_latency_seconds",
            "HTTP request latency by route and status",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
        ),
        &["route", "status"]
    )
    .expect("constant metric name is valid");

    pub static ref UP: Gauge = Gauge::new("bank_up", "Whether the bank service is up")
        .expect("constant metric name is valid");

    pub static ref RETRY_ATTEMPTS: GaugeVec = GaugeVec::new(
        prometheus::opts!(
            "bank_store_retry_attempts",
            "Last observed retry attempt count per serializable transaction kind"
        ),
        &["operation"]
    )
    .expect("constant metric name is valid");
}

/// Registers every metric with `REGISTRY`. Call once at startup.
pub fn init() {
    REGISTRY
        .register(Box::new(TRANSACTIONS_POSTED.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(TRANSACTION_LATENCY.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(CHALLENGE_OUTCOMES.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(WITHDRAWAL_TRANSITIONS.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(CASHOUT_TRANSITIONS.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(GC_ROWS_SWEPT.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(LONG_POLL_WAITERS.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(HTTP_REQUEST_LATENCY.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(UP.clone()))
        .expect("metric registration must not be called twice");
    REGISTRY
        .register(Box::new(RETRY_ATTEMPTS.clone()))
        .expect("metric registration must not be called twice");

    UP.set(1.0);
}

/// Encodes the current metric families as Prometheus text exposition format.
pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buffer);
    buffer
}

pub fn record_transaction_posted(outcome: &str, seconds: f64) {
    TRANSACTIONS_POSTED.with_label_values(&[outcome]).inc();
    TRANSACTION_LATENCY
        .with_label_values(&[outcome])
        .observe(seconds);
}

pub fn record_challenge_outcome(outcome: &str) {
    CHALLENGE_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_withdrawal_transition(to_state: &str) {
    WITHDRAWAL_TRANSITIONS.with_label_values(&[to_state]).inc();
}

pub fn record_cashout_transition(to_state: &str) {
    CASHOUT_TRANSITIONS.with_label_values(&[to_state]).inc();
}

pub fn record_gc_sweep(table: &str, count: i64) {
    GC_ROWS_SWEPT
        .with_label_values(&[table])
        .inc_by(count.max(0) as u64);
}
