pub mod cashier;
pub mod metrics;

pub use cashier::CashierContext;
pub use metrics::http_metrics_middleware;
