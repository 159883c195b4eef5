//! Services module for billing-service.

pub mod authorization;
pub mod billing;
pub mod database;
pub mod idempotency;
pub mod metrics;
pub mod repository;

pub use billing::BillingEngine;
pub use database::Database;
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore};
pub use metrics::{get_metrics, init_metrics};
