//! Invoice line rows.

use crate::models::{CreateLine, InvoiceLine};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[instrument(skip(conn, input), fields(invoice_id = %input.invoice_id))]
pub async fn insert_line(conn: &mut PgConnection, input: &CreateLine) -> Result<InvoiceLine, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_line"])
        .start_timer();

    let line = sqlx::query_as::<_, InvoiceLine>(
        r#"
        INSERT INTO invoice_lines (line_id, invoice_id, designation, quantity, unit_price, amount, tariff_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING line_id, invoice_id, designation, quantity, unit_price, amount, tariff_id, created_utc, updated_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.invoice_id)
    .bind(&input.designation)
    .bind(input.quantity)
    .bind(input.unit_price)
    .bind(input.amount())
    .bind(input.tariff_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create line: {}", e)))?;

    timer.observe_duration();

    Ok(line)
}

#[instrument(skip(conn))]
pub async fn find_line(conn: &mut PgConnection, line_id: Uuid) -> Result<Option<InvoiceLine>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_line"])
        .start_timer();

    let line = sqlx::query_as::<_, InvoiceLine>(
        r#"
        SELECT line_id, invoice_id, designation, quantity, unit_price, amount, tariff_id, created_utc, updated_utc
        FROM invoice_lines
        WHERE line_id = $1
        "#,
    )
    .bind(line_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line: {}", e)))?;

    timer.observe_duration();

    Ok(line)
}

#[instrument(skip(conn))]
pub async fn list_lines(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Vec<InvoiceLine>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["list_lines"])
        .start_timer();

    let lines = sqlx::query_as::<_, InvoiceLine>(
        r#"
        SELECT line_id, invoice_id, designation, quantity, unit_price, amount, tariff_id, created_utc, updated_utc
        FROM invoice_lines
        WHERE invoice_id = $1
        ORDER BY created_utc, line_id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list lines: {}", e)))?;

    timer.observe_duration();

    Ok(lines)
}

/// Write back designation, quantity, price and the recomputed amount.
#[instrument(skip(conn, line), fields(line_id = %line.line_id))]
pub async fn update_line(conn: &mut PgConnection, line: &InvoiceLine) -> Result<InvoiceLine, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["update_line"])
        .start_timer();

    let updated = sqlx::query_as::<_, InvoiceLine>(
        r#"
        UPDATE invoice_lines
        SET designation = $2, quantity = $3, unit_price = $4, amount = $5, updated_utc = NOW()
        WHERE line_id = $1
        RETURNING line_id, invoice_id, designation, quantity, unit_price, amount, tariff_id, created_utc, updated_utc
        "#,
    )
    .bind(line.line_id)
    .bind(&line.designation)
    .bind(line.quantity)
    .bind(line.unit_price)
    .bind(line.amount)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update line: {}", e)))?;

    timer.observe_duration();

    Ok(updated)
}

#[instrument(skip(conn))]
pub async fn delete_line(conn: &mut PgConnection, line_id: Uuid) -> Result<(), AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["delete_line"])
        .start_timer();

    sqlx::query("DELETE FROM invoice_lines WHERE line_id = $1")
        .bind(line_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete line: {}", e)))?;

    timer.observe_duration();

    Ok(())
}
