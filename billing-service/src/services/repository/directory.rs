//! Reads from the visit, tariff and staff tables owned by other modules.

use crate::models::{CashierProfile, Tariff, VISIT_AWAITING_PAYMENT, Visit};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

/// Load and row-lock a visit. Concurrent invoice hand-offs for the same
/// visit queue here.
#[instrument(skip(conn))]
pub async fn lock_visit(conn: &mut PgConnection, visit_id: Uuid) -> Result<Option<Visit>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["lock_visit"])
        .start_timer();

    let visit = sqlx::query_as::<_, Visit>(
        r#"
        SELECT visit_id, patient_id, service_id, doctor_id, planned_amount, currency, label, status
        FROM visits
        WHERE visit_id = $1
        FOR UPDATE
        "#,
    )
    .bind(visit_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock visit: {}", e)))?;

    timer.observe_duration();

    Ok(visit)
}

#[instrument(skip(conn))]
pub async fn find_visit(conn: &mut PgConnection, visit_id: Uuid) -> Result<Option<Visit>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_visit"])
        .start_timer();

    let visit = sqlx::query_as::<_, Visit>(
        r#"
        SELECT visit_id, patient_id, service_id, doctor_id, planned_amount, currency, label, status
        FROM visits
        WHERE visit_id = $1
        "#,
    )
    .bind(visit_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get visit: {}", e)))?;

    timer.observe_duration();

    Ok(visit)
}

#[instrument(skip(conn))]
pub async fn mark_visit_awaiting_payment(
    conn: &mut PgConnection,
    visit_id: Uuid,
) -> Result<(), AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["update_visit_status"])
        .start_timer();

    sqlx::query("UPDATE visits SET status = $2 WHERE visit_id = $1")
        .bind(visit_id)
        .bind(VISIT_AWAITING_PAYMENT)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update visit: {}", e)))?;

    timer.observe_duration();

    Ok(())
}

/// Active tariff by id.
#[instrument(skip(conn))]
pub async fn find_tariff(conn: &mut PgConnection, tariff_id: Uuid) -> Result<Option<Tariff>, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["find_tariff"])
        .start_timer();

    let tariff = sqlx::query_as::<_, Tariff>(
        r#"
        SELECT tariff_id, code, label, price, currency, service_id, active
        FROM tariffs
        WHERE tariff_id = $1 AND active
        "#,
    )
    .bind(tariff_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get tariff: {}", e)))?;

    timer.observe_duration();

    Ok(tariff)
}

/// Roles plus the union of service memberships and the personnel default service.
#[instrument(skip(conn))]
pub async fn load_cashier_profile(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<CashierProfile, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["load_cashier_profile"])
        .start_timer();

    let roles = sqlx::query_scalar::<_, String>(
        "SELECT role_code FROM staff_roles WHERE user_id = $1 ORDER BY role_code",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load staff roles: {}", e)))?;

    let allowed_service_ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT service_id FROM service_memberships WHERE user_id = $1
        UNION
        SELECT default_service_id FROM personnel
        WHERE user_id = $1 AND default_service_id IS NOT NULL
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to load service memberships: {}", e))
    })?;

    timer.observe_duration();

    Ok(CashierProfile {
        user_id,
        roles,
        allowed_service_ids,
    })
}
