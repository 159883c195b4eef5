//! Prometheus metrics for billing-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_counter_vec,
    CounterVec, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// HTTP request counter by route and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_http_requests_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "route"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Invoice creation attempts by outcome.
pub static INVOICES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_invoices_total",
        "Invoice creation attempts by outcome",
        &["outcome"] // created, already_invoiced, cancelled
    )
    .expect("Failed to register invoices_total")
});

/// Payments recorded by mode.
pub static PAYMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_payments_total",
        "Total number of payments by mode",
        &["mode"]
    )
    .expect("Failed to register payments_total")
});

/// Payment amount counter by currency.
pub static PAYMENT_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "billing_payment_amount_total",
        "Total payment amount by currency",
        &["currency"]
    )
    .expect("Failed to register payment_amount_total")
});

/// Cash session lifecycle counter.
pub static CASH_SESSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_cash_sessions_total",
        "Cash sessions opened and closed",
        &["event"] // opened, closed
    )
    .expect("Failed to register cash_sessions_total")
});

/// Payment requests answered from the idempotency store.
pub static IDEMPOTENT_REPLAYS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "billing_idempotent_replays_total",
        "Payment responses replayed from the idempotency store"
    )
    .expect("Failed to register idempotent_replays_total")
});

/// Business rule rejections by code.
pub static RULE_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_rule_rejections_total",
        "Requests rejected by a business rule",
        &["code"]
    )
    .expect("Failed to register rule_rejections_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&INVOICES_TOTAL);
    Lazy::force(&PAYMENTS_TOTAL);
    Lazy::force(&PAYMENT_AMOUNT_TOTAL);
    Lazy::force(&CASH_SESSIONS_TOTAL);
    Lazy::force(&IDEMPOTENT_REPLAYS_TOTAL);
    Lazy::force(&RULE_REJECTIONS_TOTAL);
}

pub fn record_payment(mode: &str, currency: &str, amount: Decimal) {
    PAYMENTS_TOTAL.with_label_values(&[mode]).inc();
    PAYMENT_AMOUNT_TOTAL
        .with_label_values(&[currency])
        .inc_by(amount.to_f64().unwrap_or_default());
}

pub fn record_rejection(code: &str) {
    RULE_REJECTIONS_TOTAL.with_label_values(&[code]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
