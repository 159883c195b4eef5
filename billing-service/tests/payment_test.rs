//! Integration tests for cashier payments.

mod common;

use common::{dec, id, money, spawn_app};
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn partial_then_full_payment_settles_invoice() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    let session = app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "2000", None).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "PARTIAL");
    assert_eq!(money(&body["invoice"]["paid"]), dec("2000"));
    assert_eq!(money(&body["invoice"]["outstanding"]), dec("3000"));
    assert_eq!(body["payment"]["session_id"], session["session_id"]);
    assert_eq!(body["payment"]["workstation"], cashier.workstation.as_str());
    assert!(body["payment"].get("idempotency_key").is_none());

    let response = app.pay(&invoice_id, &cashier, "3000", None).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "PAID");
    assert_eq!(money(&body["invoice"]["outstanding"]), dec("0"));

    let response = app.pay(&invoice_id, &cashier, "1", None).await;
    assert_eq!(response.status(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "ALREADY_SETTLED");

    let session_id = id(&session["session_id"]);
    let fetched: Value = app
        .get(&format!("/cash-sessions/{}", session_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["payments_count"], 2);
    assert_eq!(money(&fetched["total_amount"]), dec("5000"));
}

#[tokio::test]
async fn payment_above_outstanding_is_rejected() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "5000.01", None).await;
    assert_eq!(response.status(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "AMOUNT_EXCEEDS_OUTSTANDING");

    let fetched: Value = app
        .get(&format!("/invoices/{}", invoice_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert!(fetched["payments"].as_array().unwrap().is_empty());
    assert_eq!(fetched["status"], "UNPAID");
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;

    let response = app
        .pay(&id(&invoice["invoice_id"]), &cashier, "0", Some("zero-key"))
        .await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn sub_cent_amount_is_rejected() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "100").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "0.001", None).await;
    assert_eq!(response.status(), 422);

    let fetched: Value = app
        .get(&format!("/invoices/{}", invoice_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert!(fetched["payments"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn blank_mode_is_rejected() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "100").await;
    let path = format!("/invoices/{}/payments", id(&invoice["invoice_id"]));

    let response = app
        .post(&path, &cashier, Some(json!({ "amount": "100", "mode": "   " })))
        .await;
    assert_eq!(response.status(), 422);

    let response = app
        .post(&path, &cashier, Some(json!({ "amount": "100", "mode": " cash " })))
        .await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["payment"]["mode"], "cash");
}

#[tokio::test]
async fn payment_requires_an_open_session() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "1000", None).await;
    assert_eq!(response.status(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "NO_OPEN_SESSION");

    app.open_session(&cashier).await;
    let response = app.pay(&invoice_id, &cashier, "1000", None).await;
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn idempotent_retry_replays_identical_response() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let first = app.pay(&invoice_id, &cashier, "1500", Some("till-7-0001")).await;
    assert_eq!(first.status(), 201);
    assert!(first.headers().get("idempotent-replayed").is_none());
    let first_body = first.text().await.unwrap();

    let second = app.pay(&invoice_id, &cashier, "1500", Some("till-7-0001")).await;
    assert_eq!(second.status(), 201);
    assert_eq!(second.headers()["idempotent-replayed"], "true");
    let second_body = second.text().await.unwrap();
    assert_eq!(first_body, second_body);

    let fetched: Value = app
        .get(&format!("/invoices/{}", invoice_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["payments"].as_array().unwrap().len(), 1);
    assert_eq!(money(&fetched["paid_amount"]), dec("1500"));
}

#[tokio::test]
async fn key_replays_from_stored_payment_when_response_cache_is_missing() {
    let Some(app) = spawn_app().await else { return };
    // Same database, separate process-local response cache.
    let Some(other_instance) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let first = app.pay(&invoice_id, &cashier, "1500", Some("till-9-0001")).await;
    assert_eq!(first.status(), 201);
    let first: Value = first.json().await.unwrap();

    let second = other_instance
        .pay(&invoice_id, &cashier, "1500", Some("till-9-0001"))
        .await;
    assert_eq!(second.status(), 201);
    assert_eq!(second.headers()["idempotent-replayed"], "true");
    let second: Value = second.json().await.unwrap();
    assert_eq!(second["payment"]["payment_id"], first["payment"]["payment_id"]);
    assert_eq!(money(&second["invoice"]["outstanding"]), dec("3500"));

    let fetched: Value = app
        .get(&format!("/invoices/{}", invoice_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["payments"].as_array().unwrap().len(), 1);
    assert_eq!(money(&fetched["paid_amount"]), dec("1500"));
}

#[tokio::test]
async fn database_refuses_a_second_payment_under_the_same_key() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "5000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "100", Some("till-9-0002")).await;
    assert_eq!(response.status(), 201);

    let invoice_uuid: Uuid = invoice_id.parse().unwrap();
    let result = sqlx::query(
        r#"
        INSERT INTO payments (payment_id, invoice_id, amount, mode, currency, cashier_id,
                              session_id, workstation, idempotency_key)
        SELECT $1, invoice_id, amount, mode, currency, cashier_id, session_id, workstation,
               idempotency_key
        FROM payments
        WHERE invoice_id = $2
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(invoice_uuid)
    .execute(&app.pool)
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn concurrent_payments_cannot_overdraw_outstanding() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "1000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let (a, b) = tokio::join!(
        app.pay(&invoice_id, &cashier, "600", None),
        app.pay(&invoice_id, &cashier, "600", None),
    );
    let mut statuses = [a.status().as_u16(), b.status().as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, [201, 422]);

    let rejected = if a.status() == 422 { a } else { b };
    let error: Value = rejected.json().await.unwrap();
    assert_eq!(error["code"], "AMOUNT_EXCEEDS_OUTSTANDING");

    let fetched: Value = app
        .get(&format!("/invoices/{}", invoice_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["payments"].as_array().unwrap().len(), 1);
    assert_eq!(money(&fetched["paid_amount"]), dec("600"));
    assert_eq!(money(&fetched["outstanding_amount"]), dec("400"));
}

#[tokio::test]
async fn concurrent_retries_with_one_key_charge_once() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "1000").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let (a, b) = tokio::join!(
        app.pay(&invoice_id, &cashier, "500", Some("till-9-0003")),
        app.pay(&invoice_id, &cashier, "500", Some("till-9-0003")),
    );
    let statuses = [a.status().as_u16(), b.status().as_u16()];
    assert!(statuses.contains(&201), "statuses: {:?}", statuses);
    // The loser either replays or is told the key is still in flight.
    assert!(
        statuses.iter().all(|s| *s == 201 || *s == 409),
        "statuses: {:?}",
        statuses
    );

    let fetched: Value = app
        .get(&format!("/invoices/{}", invoice_id), &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["payments"].as_array().unwrap().len(), 1);
    assert_eq!(money(&fetched["paid_amount"]), dec("500"));

    let session: Value = app
        .get("/cash-sessions/current", &cashier)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(session["payments_count"], 1);
}

#[tokio::test]
async fn failed_payment_does_not_burn_idempotency_key() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    let invoice = app.invoice_for_new_visit(&cashier, "800").await;
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "800", Some("retry-me")).await;
    assert_eq!(response.status(), 422);

    app.open_session(&cashier).await;
    let response = app.pay(&invoice_id, &cashier, "800", Some("retry-me")).await;
    assert_eq!(response.status(), 201);
    assert!(response.headers().get("idempotent-replayed").is_none());
}

#[tokio::test]
async fn same_key_on_another_invoice_is_a_new_payment() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;
    let first = app.invoice_for_new_visit(&cashier, "300").await;
    let second = app.invoice_for_new_visit(&cashier, "300").await;

    let response = app
        .pay(&id(&first["invoice_id"]), &cashier, "300", Some("shared-key"))
        .await;
    assert_eq!(response.status(), 201);

    let response = app
        .pay(&id(&second["invoice_id"]), &cashier, "300", Some("shared-key"))
        .await;
    assert_eq!(response.status(), 201);
    assert!(response.headers().get("idempotent-replayed").is_none());
}

#[tokio::test]
async fn service_cashier_cannot_bill_foreign_service() {
    let Some(app) = spawn_app().await else { return };
    let own_service = Uuid::new_v4();
    let foreign_service = Uuid::new_v4();
    let cashier = app.seed_cashier(&["service_cashier"], &[own_service]).await;
    app.open_session(&cashier).await;

    let visit_id = app.seed_visit(Some(foreign_service), Some("700")).await;
    let invoice: Value = app
        .post(&format!("/visits/{}/invoice", visit_id), &cashier, None)
        .await
        .json()
        .await
        .unwrap();
    let invoice_id = id(&invoice["invoice_id"]);

    let response = app.pay(&invoice_id, &cashier, "700", None).await;
    assert_eq!(response.status(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "SERVICE_NOT_AUTHORIZED");

    let visit_id = app.seed_visit(Some(own_service), Some("700")).await;
    let invoice: Value = app
        .post(&format!("/visits/{}/invoice", visit_id), &cashier, None)
        .await
        .json()
        .await
        .unwrap();
    let response = app.pay(&id(&invoice["invoice_id"]), &cashier, "700", None).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["payment"]["service_id"], json!(own_service));
}

#[tokio::test]
async fn service_cashier_without_services_is_rejected() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_cashier(&["service_cashier"], &[]).await;
    app.open_session(&cashier).await;
    let invoice = app.invoice_for_new_visit(&cashier, "700").await;

    let response = app
        .pay(&id(&invoice["invoice_id"]), &cashier, "700", None)
        .await;
    assert_eq!(response.status(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "NO_SERVICE_ASSIGNED");
}

#[tokio::test]
async fn payment_on_unknown_invoice_is_not_found() {
    let Some(app) = spawn_app().await else { return };
    let cashier = app.seed_general_cashier().await;
    app.open_session(&cashier).await;

    let response = app
        .pay(&Uuid::new_v4().to_string(), &cashier, "10", None)
        .await;
    assert_eq!(response.status(), 404);
}
