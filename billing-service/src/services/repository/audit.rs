//! Append-only audit log.

use crate::models::{AuditEvent, NewAuditEvent};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

#[instrument(skip(conn, event), fields(kind = event.kind.as_str(), session_id = %event.session_id))]
pub async fn append_event(conn: &mut PgConnection, event: &NewAuditEvent) -> Result<(), AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["append_audit_event"])
        .start_timer();

    sqlx::query(
        r#"
        INSERT INTO audit_events (event_id, event_kind, session_id, actor_user_id, invoice_id, payment_id, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(event.event_id)
    .bind(event.kind.as_str())
    .bind(event.session_id)
    .bind(event.actor_user_id)
    .bind(event.invoice_id)
    .bind(event.payment_id)
    .bind(&event.payload)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to append audit event: {}", e)))?;

    timer.observe_duration();

    Ok(())
}

#[instrument(skip(conn))]
pub async fn list_events_for_session(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> Result<Vec<AuditEvent>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["list_audit_events"])
        .start_timer();

    let events = sqlx::query_as::<_, AuditEvent>(
        r#"
        SELECT event_id, event_kind, session_id, actor_user_id, invoice_id, payment_id, payload, created_utc
        FROM audit_events
        WHERE session_id = $1
        ORDER BY created_utc, event_id
        "#,
    )
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list audit events: {}", e)))?;

    timer.observe_duration();

    Ok(events)
}
