pub mod health;
pub mod invoices;
pub mod lines;
pub mod payments;
pub mod sessions;
