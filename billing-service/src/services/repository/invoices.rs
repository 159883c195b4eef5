//! Invoice rows and their number sequence.

use crate::models::{CreateInvoice, Invoice, InvoiceStatus, InvoiceTotals, format_invoice_number};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// Next invoice number for `year`. The sequence row stays locked until the
/// surrounding transaction ends, so numbers are unique and gap-free per year.
#[instrument(skip(conn))]
pub async fn next_invoice_number(conn: &mut PgConnection, year: i32) -> Result<String, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["next_invoice_number"])
        .start_timer();

    let sequence = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO invoice_sequences (year, last_value)
        VALUES ($1, 1)
        ON CONFLICT (year) DO UPDATE SET last_value = invoice_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(year)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to allocate invoice number: {}", e))
    })?;

    timer.observe_duration();

    Ok(format_invoice_number(year, sequence))
}

#[instrument(skip(conn, input), fields(invoice_number = %input.invoice_number))]
pub async fn insert_invoice(
    conn: &mut PgConnection,
    input: &CreateInvoice,
) -> Result<Invoice, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_invoice"])
        .start_timer();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (invoice_id, invoice_number, visit_id, patient_id, service_id, currency, status, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING invoice_id, invoice_number, visit_id, patient_id, service_id, total_amount, paid_amount,
                  outstanding_amount, currency, status, created_by, created_utc, updated_utc, cancelled_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&input.invoice_number)
    .bind(input.visit_id)
    .bind(input.patient_id)
    .bind(input.service_id)
    .bind(&input.currency)
    .bind(InvoiceStatus::Unpaid.as_str())
    .bind(input.created_by)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("Visit has already been invoiced"))
        }
        _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
    })?;

    timer.observe_duration();

    Ok(invoice)
}

#[instrument(skip(conn))]
pub async fn find_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Option<Invoice>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_invoice"])
        .start_timer();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, invoice_number, visit_id, patient_id, service_id, total_amount, paid_amount,
               outstanding_amount, currency, status, created_by, created_utc, updated_utc, cancelled_utc
        FROM invoices
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

    timer.observe_duration();

    Ok(invoice)
}

/// Load and row-lock an invoice until the transaction ends.
#[instrument(skip(conn))]
pub async fn lock_invoice(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<Option<Invoice>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["lock_invoice"])
        .start_timer();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, invoice_number, visit_id, patient_id, service_id, total_amount, paid_amount,
               outstanding_amount, currency, status, created_by, created_utc, updated_utc, cancelled_utc
        FROM invoices
        WHERE invoice_id = $1
        FOR UPDATE
        "#,
    )
    .bind(invoice_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock invoice: {}", e)))?;

    timer.observe_duration();

    Ok(invoice)
}

#[instrument(skip(conn))]
pub async fn find_invoice_by_visit(
    conn: &mut PgConnection,
    visit_id: Uuid,
) -> Result<Option<Invoice>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_invoice_by_visit"])
        .start_timer();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT invoice_id, invoice_number, visit_id, patient_id, service_id, total_amount, paid_amount,
               outstanding_amount, currency, status, created_by, created_utc, updated_utc, cancelled_utc
        FROM invoices
        WHERE visit_id = $1
        "#,
    )
    .bind(visit_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice for visit: {}", e))
    })?;

    timer.observe_duration();

    Ok(invoice)
}

/// Sum of line amounts and of payment amounts for an invoice.
#[instrument(skip(conn))]
pub async fn sum_amounts(
    conn: &mut PgConnection,
    invoice_id: Uuid,
) -> Result<(Decimal, Decimal), AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["sum_invoice_amounts"])
        .start_timer();

    let sums = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT
            COALESCE((SELECT SUM(amount) FROM invoice_lines WHERE invoice_id = $1), 0),
            COALESCE((SELECT SUM(amount) FROM payments WHERE invoice_id = $1), 0)
        "#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum invoice amounts: {}", e)))?;

    timer.observe_duration();

    Ok(sums)
}

/// Persist recomputed totals. `status` is the status to store, already
/// adjusted for cancellation.
#[instrument(skip(conn, totals))]
pub async fn store_totals(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    totals: &InvoiceTotals,
    status: InvoiceStatus,
) -> Result<Invoice, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["store_invoice_totals"])
        .start_timer();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET total_amount = $2, paid_amount = $3, outstanding_amount = $4, status = $5, updated_utc = NOW()
        WHERE invoice_id = $1
        RETURNING invoice_id, invoice_number, visit_id, patient_id, service_id, total_amount, paid_amount,
                  outstanding_amount, currency, status, created_by, created_utc, updated_utc, cancelled_utc
        "#,
    )
    .bind(invoice_id)
    .bind(totals.total)
    .bind(totals.paid)
    .bind(totals.outstanding)
    .bind(status.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to store invoice totals: {}", e)))?;

    timer.observe_duration();

    Ok(invoice)
}

#[instrument(skip(conn))]
pub async fn mark_cancelled(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Invoice, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["cancel_invoice"])
        .start_timer();

    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET status = $2, cancelled_utc = NOW(), updated_utc = NOW()
        WHERE invoice_id = $1
        RETURNING invoice_id, invoice_number, visit_id, patient_id, service_id, total_amount, paid_amount,
                  outstanding_amount, currency, status, created_by, created_utc, updated_utc, cancelled_utc
        "#,
    )
    .bind(invoice_id)
    .bind(InvoiceStatus::Cancelled.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel invoice: {}", e)))?;

    timer.observe_duration();

    Ok(invoice)
}
