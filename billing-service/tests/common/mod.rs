//! Common test utilities for billing-service integration tests.
//!
//! Tests talk to a real Postgres pointed to by `TEST_DATABASE_URL` and are
//! skipped when it is not set.

#![allow(dead_code)]

use billing_service::config::{BillingConfig, DatabaseConfig, DEFAULT_IDEMPOTENCY_TTL_SECONDS};
use billing_service::startup::Application;
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::Value;
use service_core::config::Config as CommonConfig;
use sqlx::PgPool;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,billing_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config(database_url: String) -> BillingConfig {
    BillingConfig {
        common: CommonConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        service_name: "billing-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new(database_url),
            max_connections: 5,
            min_connections: 1,
        },
        redis_url: None,
        default_currency: "XAF".to_string(),
        idempotency_ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECONDS,
    }
}

/// Running service plus a pool for seeding collaborator tables.
pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub pool: PgPool,
}

/// Spawn the service on a random port. `None` when no test database is configured.
pub async fn spawn_app() -> Option<TestApp> {
    init_tracing();

    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping billing-service integration test");
        return None;
    };

    let app = Application::build(test_config(database_url))
        .await
        .expect("Failed to build application");

    let address = format!("http://127.0.0.1:{}", app.http_port());
    let pool = app.db().pool().clone();

    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    Some(TestApp {
        address,
        client: Client::new(),
        pool,
    })
}

/// A cashier as the gateway would describe it.
#[derive(Debug, Clone)]
pub struct Cashier {
    pub user_id: Uuid,
    pub workstation: String,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Seed a cashier with the given roles and service memberships.
    pub async fn seed_cashier(&self, roles: &[&str], services: &[Uuid]) -> Cashier {
        let user_id = Uuid::new_v4();
        for role in roles {
            sqlx::query("INSERT INTO staff_roles (user_id, role_code) VALUES ($1, $2)")
                .bind(user_id)
                .bind(*role)
                .execute(&self.pool)
                .await
                .expect("Failed to seed staff role");
        }
        for service_id in services {
            sqlx::query("INSERT INTO service_memberships (user_id, service_id) VALUES ($1, $2)")
                .bind(user_id)
                .bind(*service_id)
                .execute(&self.pool)
                .await
                .expect("Failed to seed service membership");
        }
        Cashier {
            user_id,
            workstation: format!("W-{}", &user_id.simple().to_string()[..8]),
        }
    }

    pub async fn seed_general_cashier(&self) -> Cashier {
        self.seed_cashier(&["general_cashier"], &[]).await
    }

    /// Seed a visit in the given service with an optional planned amount.
    pub async fn seed_visit(&self, service_id: Option<Uuid>, planned: Option<&str>) -> Uuid {
        let visit_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO visits (visit_id, patient_id, service_id, planned_amount, currency, label)
            VALUES ($1, $2, $3, $4, 'XAF', 'Consultation')
            "#,
        )
        .bind(visit_id)
        .bind(Uuid::new_v4())
        .bind(service_id)
        .bind(planned.map(|p| Decimal::from_str(p).expect("planned amount")))
        .execute(&self.pool)
        .await
        .expect("Failed to seed visit");
        visit_id
    }

    pub async fn seed_tariff(&self, price: &str, active: bool) -> Uuid {
        let tariff_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO tariffs (tariff_id, code, label, price, currency, active)
            VALUES ($1, $2, 'Hemogram', $3, 'XAF', $4)
            "#,
        )
        .bind(tariff_id)
        .bind(format!("LAB-{}", tariff_id.simple()))
        .bind(Decimal::from_str(price).expect("tariff price"))
        .bind(active)
        .execute(&self.pool)
        .await
        .expect("Failed to seed tariff");
        tariff_id
    }

    pub async fn visit_status(&self, visit_id: Uuid) -> String {
        sqlx::query_scalar::<_, String>("SELECT status FROM visits WHERE visit_id = $1")
            .bind(visit_id)
            .fetch_one(&self.pool)
            .await
            .expect("Failed to read visit status")
    }

    fn as_cashier(&self, request: RequestBuilder, cashier: &Cashier) -> RequestBuilder {
        request
            .header("X-User-ID", cashier.user_id.to_string())
            .header("X-Workstation", cashier.workstation.as_str())
    }

    pub async fn get(&self, path: &str, cashier: &Cashier) -> Response {
        self.as_cashier(self.client.get(self.url(path)), cashier)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, cashier: &Cashier, body: Option<Value>) -> Response {
        let mut request = self.as_cashier(self.client.post(self.url(path)), cashier);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn patch(&self, path: &str, cashier: &Cashier, body: Value) -> Response {
        self.as_cashier(self.client.patch(self.url(path)), cashier)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str, cashier: &Cashier) -> Response {
        self.as_cashier(self.client.delete(self.url(path)), cashier)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// POST a payment, optionally with an idempotency key.
    pub async fn pay(
        &self,
        invoice_id: &str,
        cashier: &Cashier,
        amount: &str,
        idempotency_key: Option<&str>,
    ) -> Response {
        let mut request = self
            .as_cashier(
                self.client.post(self.url(&format!("/invoices/{}/payments", invoice_id))),
                cashier,
            )
            .json(&serde_json::json!({ "amount": amount, "mode": "cash" }));
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        request.send().await.expect("Failed to execute request")
    }

    /// Open a session on the cashier's own workstation.
    pub async fn open_session(&self, cashier: &Cashier) -> Value {
        let response = self.post("/cash-sessions", cashier, None).await;
        assert_eq!(response.status(), 201, "opening a session should succeed");
        response.json().await.expect("session body")
    }

    /// Create an invoice for a fresh visit and return its body.
    pub async fn invoice_for_new_visit(&self, cashier: &Cashier, planned: &str) -> Value {
        let visit_id = self.seed_visit(None, Some(planned)).await;
        let response = self
            .post(&format!("/visits/{}/invoice", visit_id), cashier, None)
            .await;
        assert_eq!(response.status(), 201, "invoice creation should succeed");
        response.json().await.expect("invoice body")
    }
}

/// Money fields travel as JSON strings.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a money value: {other}"),
    }
}

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).expect("decimal literal")
}

pub fn id(value: &Value) -> String {
    value.as_str().expect("id string").to_string()
}
