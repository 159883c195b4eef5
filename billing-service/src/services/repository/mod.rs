//! Row-level access, one module per table group.
//!
//! Every function takes a `&mut PgConnection` so callers can run several of
//! them inside one transaction.

pub mod audit;
pub mod directory;
pub mod invoices;
pub mod lines;
pub mod payments;
pub mod sessions;
