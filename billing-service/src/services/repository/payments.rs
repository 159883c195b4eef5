//! Payment rows. Insert and read only.

use crate::error::BillingError;
use crate::models::{CreatePayment, Payment};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[instrument(skip(conn, input), fields(invoice_id = %input.invoice_id, session_id = %input.session_id))]
pub async fn insert_payment(conn: &mut PgConnection, input: &CreatePayment) -> Result<Payment, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_payment"])
        .start_timer();

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (payment_id, invoice_id, amount, mode, reference, currency, cashier_id,
                              session_id, workstation, service_id, idempotency_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING payment_id, invoice_id, amount, mode, reference, currency, cashier_id, session_id,
                  workstation, service_id, idempotency_key, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.invoice_id)
    .bind(input.amount)
    .bind(&input.mode)
    .bind(&input.reference)
    .bind(&input.currency)
    .bind(input.cashier_id)
    .bind(input.session_id)
    .bind(&input.workstation)
    .bind(input.service_id)
    .bind(&input.idempotency_key)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::from(BillingError::IdempotencyKeyInFlight)
        }
        _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create payment: {}", e)),
    })?;

    timer.observe_duration();

    Ok(payment)
}

/// Payment already posted on `invoice_id` under a client idempotency key.
#[instrument(skip(conn, idempotency_key))]
pub async fn find_payment_by_idempotency_key(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    idempotency_key: &str,
) -> Result<Option<Payment>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_payment_by_idempotency_key"])
        .start_timer();

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        SELECT payment_id, invoice_id, amount, mode, reference, currency, cashier_id, session_id,
               workstation, service_id, idempotency_key, created_utc
        FROM payments
        WHERE invoice_id = $1 AND idempotency_key = $2
        "#,
    )
    .bind(invoice_id)
    .bind(idempotency_key)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find payment: {}", e)))?;

    timer.observe_duration();

    Ok(payment)
}

#[instrument(skip(conn))]
pub async fn list_payments(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Vec<Payment>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["list_payments"])
        .start_timer();

    let payments = sqlx::query_as::<_, Payment>(
        r#"
        SELECT payment_id, invoice_id, amount, mode, reference, currency, cashier_id, session_id,
               workstation, service_id, idempotency_key, created_utc
        FROM payments
        WHERE invoice_id = $1
        ORDER BY created_utc, payment_id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

    timer.observe_duration();

    Ok(payments)
}

#[instrument(skip(conn))]
pub async fn count_payments(conn: &mut PgConnection, invoice_id: Uuid) -> Result<i64, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["count_payments"])
        .start_timer();

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments WHERE invoice_id = $1")
        .bind(invoice_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count payments: {}", e)))?;

    timer.observe_duration();

    Ok(count)
}
