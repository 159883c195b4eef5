//! Cash session rows.

use crate::error::BillingError;
use crate::models::{CashSession, OpenCashSession};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// Insert an open session. A second open session for the same user and
/// workstation trips `cash_sessions_open_uidx`.
#[instrument(skip(conn, input), fields(user_id = %input.user_id, workstation = %input.workstation))]
pub async fn insert_session(
    conn: &mut PgConnection,
    input: &OpenCashSession,
) -> Result<CashSession, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["insert_session"])
        .start_timer();

    let session = sqlx::query_as::<_, CashSession>(
        r#"
        INSERT INTO cash_sessions (session_id, user_id, workstation, service_id, currency, open_key)
        VALUES ($1, $2, $3, $4, $5, $3)
        RETURNING session_id, user_id, workstation, service_id, currency, opened_utc, closed_utc,
                  closing_note, payments_count, total_amount
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.user_id)
    .bind(&input.workstation)
    .bind(input.service_id)
    .bind(&input.currency)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::from(BillingError::SessionAlreadyOpen(input.workstation.clone()))
        }
        _ => AppError::DatabaseError(anyhow::anyhow!("Failed to open cash session: {}", e)),
    })?;

    timer.observe_duration();

    Ok(session)
}

#[instrument(skip(conn))]
pub async fn find_session(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> Result<Option<CashSession>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_session"])
        .start_timer();

    let session = sqlx::query_as::<_, CashSession>(
        r#"
        SELECT session_id, user_id, workstation, service_id, currency, opened_utc, closed_utc,
               closing_note, payments_count, total_amount
        FROM cash_sessions
        WHERE session_id = $1
        "#,
    )
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get cash session: {}", e)))?;

    timer.observe_duration();

    Ok(session)
}

/// Load and row-lock a session until the transaction ends.
#[instrument(skip(conn))]
pub async fn lock_session(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> Result<Option<CashSession>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["lock_session"])
        .start_timer();

    let session = sqlx::query_as::<_, CashSession>(
        r#"
        SELECT session_id, user_id, workstation, service_id, currency, opened_utc, closed_utc,
               closing_note, payments_count, total_amount
        FROM cash_sessions
        WHERE session_id = $1
        FOR UPDATE
        "#,
    )
    .bind(session_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock cash session: {}", e)))?;

    timer.observe_duration();

    Ok(session)
}

/// The user's open session, preferring one on `workstation`, otherwise the
/// most recently opened one.
#[instrument(skip(conn))]
pub async fn find_open_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    workstation: Option<&str>,
) -> Result<Option<CashSession>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_open_session"])
        .start_timer();

    let session = sqlx::query_as::<_, CashSession>(
        r#"
        SELECT session_id, user_id, workstation, service_id, currency, opened_utc, closed_utc,
               closing_note, payments_count, total_amount
        FROM cash_sessions
        WHERE user_id = $1
          AND closed_utc IS NULL
        ORDER BY (workstation = $2::VARCHAR) DESC NULLS LAST, opened_utc DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(workstation)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find open session: {}", e)))?;

    timer.observe_duration();

    Ok(session)
}

/// Add one payment of `amount` to the session aggregates. Only open sessions
/// are touched; `None` means the session closed underneath the caller.
#[instrument(skip(conn))]
pub async fn add_payment_to_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    amount: Decimal,
) -> Result<Option<CashSession>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["add_payment_to_session"])
        .start_timer();

    let session = sqlx::query_as::<_, CashSession>(
        r#"
        UPDATE cash_sessions
        SET payments_count = payments_count + 1, total_amount = total_amount + $2
        WHERE session_id = $1 AND closed_utc IS NULL
        RETURNING session_id, user_id, workstation, service_id, currency, opened_utc, closed_utc,
                  closing_note, payments_count, total_amount
        "#,
    )
    .bind(session_id)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to update session totals: {}", e))
    })?;

    timer.observe_duration();

    Ok(session)
}

#[instrument(skip(conn, note))]
pub async fn close_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    note: Option<&str>,
) -> Result<CashSession, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["close_session"])
        .start_timer();

    let session = sqlx::query_as::<_, CashSession>(
        r#"
        UPDATE cash_sessions
        SET closed_utc = NOW(), closing_note = $2, open_key = NULL
        WHERE session_id = $1
        RETURNING session_id, user_id, workstation, service_id, currency, opened_utc, closed_utc,
                  closing_note, payments_count, total_amount
        "#,
    )
    .bind(session_id)
    .bind(note)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to close cash session: {}", e)))?;

    timer.observe_duration();

    Ok(session)
}
