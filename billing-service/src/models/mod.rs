//! Domain models for billing-service.

mod audit_event;
mod cash_session;
mod directory;
mod invoice;
mod line;
mod payment;
mod precision;

pub use audit_event::{AuditEvent, AuditEventKind, NewAuditEvent};
pub use cash_session::{CashSession, OpenCashSession};
pub use directory::{CashierProfile, Tariff, VISIT_AWAITING_PAYMENT, Visit};
pub use invoice::{
    CreateInvoice, Invoice, InvoiceAggregate, InvoiceStatus, InvoiceTotals, format_invoice_number,
};
pub use line::{
    CreateLine, InvoiceLine, UpdateLine, check_quantity, check_unit_price, line_amount,
    resolve_line,
};
pub use payment::{CreatePayment, Payment, check_payable};
pub use precision::{MONEY_SCALE, QUANTITY_SCALE, fits_scale};
