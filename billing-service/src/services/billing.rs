//! Billing engine: invoices, lines, payments and cash sessions.
//!
//! Every mutation runs in one transaction. Lock order is visit, then
//! invoice, then cash session; the invoice row lock linearises payments and
//! line edits on the same invoice.

use crate::dtos::{InvoiceSummary, PaymentResponse};
use crate::error::BillingError;
use crate::middleware::CashierContext;
use crate::models::{
    AuditEvent, CashSession, CreateInvoice, CreateLine, CreatePayment, Invoice, InvoiceAggregate,
    InvoiceLine, InvoiceTotals, NewAuditEvent, OpenCashSession, UpdateLine, check_payable,
    resolve_line,
};
use crate::services::authorization::resolve_payment_service;
use crate::services::database::{commit, Database};
use crate::services::idempotency::{
    payment_key, CachedResponse, IdempotencyEntry, IdempotencyStore, PENDING_TTL_SECONDS,
};
use crate::services::metrics::{
    record_payment, record_rejection, CASH_SESSIONS_TOTAL, IDEMPOTENT_REPLAYS_TOTAL,
    INVOICES_TOTAL,
};
use crate::services::repository::{audit, directory, invoices, lines, payments, sessions};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Designation of the line raised from a visit's planned amount.
const VISIT_LINE_DESIGNATION: &str = "Consultation";

/// Result of a visit hand-off.
#[derive(Debug)]
pub enum CreateInvoiceOutcome {
    Created(InvoiceAggregate),
    /// The visit was already invoiced; this is the existing invoice.
    AlreadyInvoiced(InvoiceAggregate),
}

#[derive(Debug, Clone)]
pub struct LineInput {
    pub designation: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub tariff_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub mode: String,
    pub reference: Option<String>,
    pub service_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionInput {
    pub workstation: Option<String>,
    pub service_id: Option<Uuid>,
    pub currency: Option<String>,
}

/// Serialized payment response, fresh or replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReply {
    pub status: u16,
    pub body: String,
    pub replayed: bool,
}

/// Result of the payment transaction.
#[derive(Debug)]
enum PaymentOutcome {
    Recorded(PaymentResponse),
    /// The idempotency key had already posted a payment on this invoice.
    AlreadyRecorded(PaymentResponse),
}

impl PaymentOutcome {
    fn into_parts(self) -> (PaymentResponse, bool) {
        match self {
            PaymentOutcome::Recorded(response) => (response, false),
            PaymentOutcome::AlreadyRecorded(response) => (response, true),
        }
    }
}

/// Log and count a business-rule rejection on its way out.
fn rejected(err: BillingError) -> AppError {
    warn!(code = err.code(), reason = %err, "Request rejected by business rule");
    record_rejection(err.code());
    err.into()
}

fn response_body(response: &PaymentResponse) -> Result<String, AppError> {
    serde_json::to_string(response).map_err(|e| AppError::InternalError(e.into()))
}

/// Recompute totals and status from the current lines and payments.
/// The caller must hold the invoice row lock.
async fn recalculate(conn: &mut PgConnection, invoice: &Invoice) -> Result<Invoice, AppError> {
    let (total, paid) = invoices::sum_amounts(conn, invoice.invoice_id).await?;
    let totals = InvoiceTotals::compute(total, paid);
    invoices::store_totals(
        conn,
        invoice.invoice_id,
        &totals,
        totals.status_given(invoice.status()),
    )
    .await
}

async fn load_aggregate(conn: &mut PgConnection, invoice: Invoice) -> Result<InvoiceAggregate, AppError> {
    let lines = lines::list_lines(conn, invoice.invoice_id).await?;
    let payments = payments::list_payments(conn, invoice.invoice_id).await?;
    let visit = match invoice.visit_id {
        Some(visit_id) => directory::find_visit(conn, visit_id).await?,
        None => None,
    };
    Ok(InvoiceAggregate {
        invoice,
        lines,
        payments,
        visit,
    })
}

/// Lock an invoice that may still change: it must exist and not be cancelled.
async fn lock_mutable_invoice(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Invoice, AppError> {
    let invoice = invoices::lock_invoice(conn, invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
    if invoice.is_cancelled() {
        return Err(rejected(BillingError::InvoiceCancelled));
    }
    Ok(invoice)
}

/// Session a payment or lookup should use: the session attached to the
/// request when it is the caller's and still open, else the caller's open
/// session on the request workstation, else their latest open session.
async fn select_session(
    conn: &mut PgConnection,
    ctx: &CashierContext,
) -> Result<Option<CashSession>, AppError> {
    if let Some(session_id) = ctx.session_id {
        if let Some(session) = sessions::find_session(conn, session_id).await? {
            if session.user_id == ctx.user_id && session.is_open() {
                return Ok(Some(session));
            }
        }
    }
    sessions::find_open_session(conn, ctx.user_id, ctx.workstation.as_deref()).await
}

pub struct BillingEngine {
    db: Arc<Database>,
    idempotency: Arc<dyn IdempotencyStore>,
    default_currency: String,
    idempotency_ttl_seconds: u64,
}

impl BillingEngine {
    pub fn new(
        db: Arc<Database>,
        idempotency: Arc<dyn IdempotencyStore>,
        default_currency: String,
        idempotency_ttl_seconds: u64,
    ) -> Self {
        Self {
            db,
            idempotency,
            default_currency,
            idempotency_ttl_seconds,
        }
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, AppError> {
        self.db.pool().acquire().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to acquire connection: {}", e))
        })
    }

    // ---- Invoice Operations ----

    /// Raise the invoice for a visit, at most once per visit.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn create_invoice_from_visit(
        &self,
        visit_id: Uuid,
        ctx: &CashierContext,
    ) -> Result<CreateInvoiceOutcome, AppError> {
        let mut tx = self.db.begin().await?;

        let visit = directory::lock_visit(&mut tx, visit_id)
            .await?
            .ok_or(BillingError::VisitNotFound(visit_id))?;

        if let Some(existing) = invoices::find_invoice_by_visit(&mut tx, visit_id).await? {
            let aggregate = load_aggregate(&mut tx, existing).await?;
            commit(tx).await?;
            INVOICES_TOTAL.with_label_values(&["already_invoiced"]).inc();
            info!(
                invoice_id = %aggregate.invoice.invoice_id,
                visit_id = %visit_id,
                "Visit already invoiced"
            );
            return Ok(CreateInvoiceOutcome::AlreadyInvoiced(aggregate));
        }

        let invoice_number = invoices::next_invoice_number(&mut tx, Utc::now().year()).await?;
        let invoice = invoices::insert_invoice(
            &mut tx,
            &CreateInvoice {
                invoice_number,
                visit_id: Some(visit.visit_id),
                patient_id: Some(visit.patient_id),
                service_id: visit.service_id,
                currency: visit
                    .currency
                    .clone()
                    .unwrap_or_else(|| self.default_currency.clone()),
                created_by: Some(ctx.user_id),
            },
        )
        .await?;

        if let Some(planned) = visit.billable_amount() {
            let line = CreateLine {
                invoice_id: invoice.invoice_id,
                designation: visit
                    .label
                    .clone()
                    .unwrap_or_else(|| VISIT_LINE_DESIGNATION.to_string()),
                quantity: Decimal::ONE,
                unit_price: planned,
                tariff_id: None,
            };
            lines::insert_line(&mut tx, &line).await?;
        }

        directory::mark_visit_awaiting_payment(&mut tx, visit_id).await?;

        // The new row is ours until commit, no lock needed to recalculate it.
        let invoice = recalculate(&mut tx, &invoice).await?;
        let aggregate = load_aggregate(&mut tx, invoice).await?;
        commit(tx).await?;

        INVOICES_TOTAL.with_label_values(&["created"]).inc();
        info!(
            invoice_id = %aggregate.invoice.invoice_id,
            invoice_number = %aggregate.invoice.invoice_number,
            visit_id = %visit_id,
            total = %aggregate.invoice.total_amount,
            "Invoice created from visit"
        );

        Ok(CreateInvoiceOutcome::Created(aggregate))
    }

    #[instrument(skip(self))]
    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceAggregate, AppError> {
        let mut conn = self.acquire().await?;
        let invoice = invoices::find_invoice(&mut conn, invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;
        load_aggregate(&mut conn, invoice).await
    }

    /// Cancel an invoice with no payments. Cancelling twice is a no-op.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn cancel_invoice(
        &self,
        invoice_id: Uuid,
        ctx: &CashierContext,
    ) -> Result<InvoiceAggregate, AppError> {
        let mut tx = self.db.begin().await?;

        let invoice = invoices::lock_invoice(&mut tx, invoice_id)
            .await?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;

        let invoice = if invoice.is_cancelled() {
            invoice
        } else {
            if payments::count_payments(&mut tx, invoice_id).await? > 0 {
                return Err(rejected(BillingError::InvoiceHasPayments));
            }
            let cancelled = invoices::mark_cancelled(&mut tx, invoice_id).await?;
            INVOICES_TOTAL.with_label_values(&["cancelled"]).inc();
            info!(
                invoice_id = %invoice_id,
                invoice_number = %cancelled.invoice_number,
                "Invoice cancelled"
            );
            cancelled
        };

        let aggregate = load_aggregate(&mut tx, invoice).await?;
        commit(tx).await?;

        Ok(aggregate)
    }

    // ---- Line Operations ----

    #[instrument(skip(self, input))]
    pub async fn add_line(&self, invoice_id: Uuid, input: LineInput) -> Result<InvoiceLine, AppError> {
        let mut tx = self.db.begin().await?;

        let invoice = lock_mutable_invoice(&mut tx, invoice_id).await?;

        // A tariff miss is silent: the caller's own values stand.
        let tariff = match input.tariff_id {
            Some(tariff_id) => directory::find_tariff(&mut tx, tariff_id).await?,
            None => None,
        };

        let new_line = resolve_line(
            invoice_id,
            input.designation,
            input.quantity,
            input.unit_price,
            input.tariff_id,
            tariff.as_ref(),
        )
        .map_err(rejected)?;

        let line = lines::insert_line(&mut tx, &new_line).await?;
        let invoice = recalculate(&mut tx, &invoice).await?;
        commit(tx).await?;

        info!(
            line_id = %line.line_id,
            invoice_id = %invoice_id,
            amount = %line.amount,
            invoice_total = %invoice.total_amount,
            "Invoice line added"
        );

        Ok(line)
    }

    #[instrument(skip(self, changes))]
    pub async fn update_line(&self, line_id: Uuid, changes: UpdateLine) -> Result<InvoiceLine, AppError> {
        let mut tx = self.db.begin().await?;

        let (invoice, mut line) = self.lock_line(&mut tx, line_id).await?;

        changes.apply_to(&mut line).map_err(rejected)?;
        let line = lines::update_line(&mut tx, &line).await?;
        let invoice = recalculate(&mut tx, &invoice).await?;
        commit(tx).await?;

        info!(
            line_id = %line_id,
            invoice_id = %invoice.invoice_id,
            amount = %line.amount,
            invoice_total = %invoice.total_amount,
            status = %invoice.status,
            "Invoice line updated"
        );

        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn delete_line(&self, line_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;

        let (invoice, _) = self.lock_line(&mut tx, line_id).await?;

        lines::delete_line(&mut tx, line_id).await?;
        let invoice = recalculate(&mut tx, &invoice).await?;
        commit(tx).await?;

        info!(
            line_id = %line_id,
            invoice_id = %invoice.invoice_id,
            invoice_total = %invoice.total_amount,
            "Invoice line deleted"
        );

        Ok(())
    }

    /// Lock the invoice owning a line, then re-read the line under that lock.
    async fn lock_line(
        &self,
        conn: &mut PgConnection,
        line_id: Uuid,
    ) -> Result<(Invoice, InvoiceLine), AppError> {
        let line = lines::find_line(conn, line_id)
            .await?
            .ok_or(BillingError::LineNotFound(line_id))?;
        let invoice = lock_mutable_invoice(conn, line.invoice_id).await?;
        let line = lines::find_line(conn, line_id)
            .await?
            .ok_or(BillingError::LineNotFound(line_id))?;
        Ok((invoice, line))
    }

    // ---- Payment Operations ----

    /// Post a payment, replaying the stored response when the idempotency
    /// key has been seen for this invoice.
    #[instrument(
        skip(self, input, ctx),
        fields(user_id = %ctx.user_id, amount = %input.amount, mode = %input.mode)
    )]
    pub async fn create_payment(
        &self,
        invoice_id: Uuid,
        input: PaymentInput,
        ctx: &CashierContext,
    ) -> Result<PaymentReply, AppError> {
        let Some(key) = input.idempotency_key.as_deref().map(|k| payment_key(invoice_id, k)) else {
            let (response, replayed) = self
                .record_payment(invoice_id, &input, ctx)
                .await?
                .into_parts();
            return Ok(PaymentReply {
                status: 201,
                body: response_body(&response)?,
                replayed,
            });
        };

        if let Some(reply) = self.replay(&key).await? {
            return Ok(reply);
        }

        if !self
            .idempotency
            .try_reserve(&key, PENDING_TTL_SECONDS)
            .await?
        {
            // Lost the race: either finished meanwhile or still in flight.
            return match self.replay(&key).await? {
                Some(reply) => Ok(reply),
                None => Err(rejected(BillingError::IdempotencyKeyInFlight)),
            };
        }

        let outcome = match self.record_payment(invoice_id, &input, ctx).await {
            Ok(outcome) => {
                let (response, replayed) = outcome.into_parts();
                response_body(&response).map(|body| (body, replayed))
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok((body, replayed)) => {
                if replayed {
                    IDEMPOTENT_REPLAYS_TOTAL.inc();
                }
                let cached = CachedResponse { status: 201, body };
                if let Err(e) = self
                    .idempotency
                    .put(&key, &cached, self.idempotency_ttl_seconds)
                    .await
                {
                    warn!(error = %e, "Failed to store idempotent payment response");
                }
                Ok(PaymentReply {
                    status: cached.status,
                    body: cached.body,
                    replayed,
                })
            }
            Err(err) => {
                if let Err(e) = self.idempotency.release(&key).await {
                    warn!(error = %e, "Failed to release idempotency key");
                }
                Err(err)
            }
        }
    }

    async fn replay(&self, key: &str) -> Result<Option<PaymentReply>, AppError> {
        match self.idempotency.get(key).await? {
            Some(IdempotencyEntry::Completed(cached)) => {
                IDEMPOTENT_REPLAYS_TOTAL.inc();
                info!("Replaying stored payment response");
                Ok(Some(PaymentReply {
                    status: cached.status,
                    body: cached.body,
                    replayed: true,
                }))
            }
            Some(IdempotencyEntry::Pending) => Err(rejected(BillingError::IdempotencyKeyInFlight)),
            None => Ok(None),
        }
    }

    /// The payment transaction itself: validate, attribute, insert, audit,
    /// bump the session and recalculate, all or nothing. A key that already
    /// posted a payment on this invoice returns that payment instead.
    async fn record_payment(
        &self,
        invoice_id: Uuid,
        input: &PaymentInput,
        ctx: &CashierContext,
    ) -> Result<PaymentOutcome, AppError> {
        let mut tx = self.db.begin().await?;

        let invoice = lock_mutable_invoice(&mut tx, invoice_id).await?;

        if let Some(key) = input.idempotency_key.as_deref() {
            if let Some(payment) =
                payments::find_payment_by_idempotency_key(&mut tx, invoice_id, key).await?
            {
                commit(tx).await?;
                info!(
                    payment_id = %payment.payment_id,
                    invoice_id = %invoice_id,
                    "Payment already recorded under this idempotency key"
                );
                return Ok(PaymentOutcome::AlreadyRecorded(PaymentResponse {
                    invoice: InvoiceSummary::from(&invoice),
                    payment,
                }));
            }
        }

        let invoice = recalculate(&mut tx, &invoice).await?;
        check_payable(invoice.outstanding_amount, input.amount).map_err(rejected)?;

        let profile = directory::load_cashier_profile(&mut tx, ctx.user_id).await?;
        let invoice_service = match (invoice.service_id, invoice.visit_id) {
            (Some(service_id), _) => Some(service_id),
            (None, Some(visit_id)) => directory::find_visit(&mut tx, visit_id)
                .await?
                .and_then(|visit| visit.service_id),
            (None, None) => None,
        };
        let service_id =
            resolve_payment_service(&profile, invoice_service, input.service_id).map_err(rejected)?;

        let selected = select_session(&mut tx, ctx)
            .await?
            .ok_or_else(|| rejected(BillingError::NoOpenSession))?;
        let session = sessions::lock_session(&mut tx, selected.session_id)
            .await?
            .filter(CashSession::is_open)
            .ok_or_else(|| rejected(BillingError::NoOpenSession))?;

        let payment = payments::insert_payment(
            &mut tx,
            &CreatePayment {
                invoice_id,
                amount: input.amount,
                mode: input.mode.clone(),
                reference: input.reference.clone(),
                currency: invoice.currency.clone(),
                cashier_id: ctx.user_id,
                session_id: session.session_id,
                workstation: session.workstation.clone(),
                service_id,
                idempotency_key: input.idempotency_key.clone(),
            },
        )
        .await?;

        audit::append_event(
            &mut tx,
            &NewAuditEvent::payment_created(&invoice, &payment, ctx.client_ip.as_deref()),
        )
        .await?;

        sessions::add_payment_to_session(&mut tx, session.session_id, payment.amount)
            .await?
            .ok_or_else(|| rejected(BillingError::NoOpenSession))?;

        let invoice = recalculate(&mut tx, &invoice).await?;
        commit(tx).await?;

        record_payment(&payment.mode, &payment.currency, payment.amount);
        info!(
            payment_id = %payment.payment_id,
            invoice_id = %invoice_id,
            session_id = %session.session_id,
            amount = %payment.amount,
            outstanding = %invoice.outstanding_amount,
            status = %invoice.status,
            "Payment recorded"
        );

        Ok(PaymentOutcome::Recorded(PaymentResponse {
            invoice: InvoiceSummary::from(&invoice),
            payment,
        }))
    }

    // ---- Cash Session Operations ----

    #[instrument(skip(self, input, ctx), fields(user_id = %ctx.user_id))]
    pub async fn open_session(
        &self,
        input: SessionInput,
        ctx: &CashierContext,
    ) -> Result<CashSession, AppError> {
        let workstation = input
            .workstation
            .or_else(|| ctx.workstation.clone())
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .ok_or_else(|| rejected(BillingError::Validation("workstation is required".to_string())))?;

        let mut tx = self.db.begin().await?;

        let session = sessions::insert_session(
            &mut tx,
            &OpenCashSession {
                user_id: ctx.user_id,
                workstation,
                service_id: input.service_id,
                currency: input
                    .currency
                    .unwrap_or_else(|| self.default_currency.clone()),
            },
        )
        .await?;

        audit::append_event(
            &mut tx,
            &NewAuditEvent::session_opened(&session, ctx.client_ip.as_deref()),
        )
        .await?;
        commit(tx).await?;

        CASH_SESSIONS_TOTAL.with_label_values(&["opened"]).inc();
        info!(
            session_id = %session.session_id,
            workstation = %session.workstation,
            "Cash session opened"
        );

        Ok(session)
    }

    /// Close a session. Owners may close their own; supervisors any.
    #[instrument(skip(self, note, ctx), fields(user_id = %ctx.user_id))]
    pub async fn close_session(
        &self,
        session_id: Uuid,
        note: Option<String>,
        ctx: &CashierContext,
    ) -> Result<CashSession, AppError> {
        let mut tx = self.db.begin().await?;

        let session = sessions::lock_session(&mut tx, session_id)
            .await?
            .ok_or(BillingError::SessionNotFound(session_id))?;

        if session.user_id != ctx.user_id {
            let profile = directory::load_cashier_profile(&mut tx, ctx.user_id).await?;
            if !profile.is_supervisor() {
                return Err(rejected(BillingError::SessionNotOwned));
            }
        }
        if !session.is_open() {
            return Err(rejected(BillingError::SessionClosed));
        }

        let closed = sessions::close_session(&mut tx, session_id, note.as_deref()).await?;
        audit::append_event(
            &mut tx,
            &NewAuditEvent::session_closed(&closed, ctx.user_id, ctx.client_ip.as_deref()),
        )
        .await?;
        commit(tx).await?;

        CASH_SESSIONS_TOTAL.with_label_values(&["closed"]).inc();
        info!(
            session_id = %session_id,
            payments_count = closed.payments_count,
            total_amount = %closed.total_amount,
            "Cash session closed"
        );

        Ok(closed)
    }

    /// The session a payment from this context would be booked on.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn current_session(&self, ctx: &CashierContext) -> Result<CashSession, AppError> {
        let mut conn = self.acquire().await?;
        select_session(&mut conn, ctx)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No open cash session")))
    }

    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: Uuid) -> Result<CashSession, AppError> {
        let mut conn = self.acquire().await?;
        Ok(sessions::find_session(&mut conn, session_id)
            .await?
            .ok_or(BillingError::SessionNotFound(session_id))?)
    }

    #[instrument(skip(self))]
    pub async fn list_session_audit_events(&self, session_id: Uuid) -> Result<Vec<AuditEvent>, AppError> {
        let mut conn = self.acquire().await?;
        sessions::find_session(&mut conn, session_id)
            .await?
            .ok_or(BillingError::SessionNotFound(session_id))?;
        audit::list_events_for_session(&mut conn, session_id).await
    }
}
