//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations, seeding sales fixtures, and a scripted in-process ERP.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use migration::{Migrator, MigratorTrait};
use order_sync::config::{AppConfig, CancellationGranularity, WorkerConfig};
use order_sync::models::{mail_credential, product, sale_transaction};
use order_sync::repositories::NewSyncJob;
use order_sync::sync::{
    ErpGateway, JobController, Notifier, OrderAggregate, OrderLine, RemoteRecord, Step, StepError,
    SyncWindow, window::date_to_int,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, Set, Statement};
use tokio::sync::Notify;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // Fixtures reference runs and jobs loosely; keep SQLite from enforcing FKs.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

pub fn day(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("fixture date")
}

/// Configuration with a fast step policy suitable for tests.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        worker: WorkerConfig {
            tick_ms: 100,
            concurrency: 2,
            claim_batch: 5,
            stale_after_seconds: 60,
            step_timeout_seconds: 5,
            step_max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            jitter_factor: 0.0,
            cancellation_granularity: CancellationGranularity::PerOrder,
        },
        ..AppConfig::default()
    }
}

pub fn controller(db: &DatabaseConnection, config: &AppConfig, erp: Arc<ScriptedErp>) -> JobController {
    JobController::new(db.clone(), config, erp, Notifier::disabled())
}

pub fn new_job(from: &str, to: &str) -> NewSyncJob {
    NewSyncJob {
        id: None,
        window: SyncWindow::parse(from, to).expect("fixture window"),
        owner_id: "owner-1".to_string(),
        owner_email: "owner@example.com".to_string(),
        owner_name: "Owner".to_string(),
    }
}

/// Inserts a catalogue product.
pub async fn insert_product(
    db: &DatabaseConnection,
    sku: &str,
    brand: Option<&str>,
    supplier: Option<&str>,
    is_non_stock: bool,
) -> Result<()> {
    product::ActiveModel {
        sku: Set(sku.to_string()),
        name: Set(format!("Product {sku}")),
        brand_name: Set(brand.map(str::to_string)),
        supplier_name: Set(supplier.map(str::to_string)),
        is_non_stock: Set(is_non_stock),
    }
    .insert(db)
    .await?;
    Ok(())
}

pub async fn insert_mail_credential(db: &DatabaseConnection, owner_id: &str) -> Result<()> {
    mail_credential::ActiveModel {
        owner_id: Set(owner_id.to_string()),
        sender_address: Set("sync@example.com".to_string()),
        api_token: Set("mail-token".to_string()),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Builder for one `sale_transactions` row.
#[derive(Debug, Clone)]
pub struct SaleLine {
    pub order_number: String,
    pub date: NaiveDate,
    pub phone: Option<String>,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub payment_method: String,
    pub is_deleted: bool,
    pub sent_to_erp: bool,
}

impl SaleLine {
    pub fn new(order_number: &str, date: &str, sku: &str) -> Self {
        Self {
            order_number: order_number.to_string(),
            date: day(date),
            phone: Some(format!("555-{order_number}")),
            sku: sku.to_string(),
            quantity: 1,
            unit_price: 10.0,
            payment_method: "cash".to_string(),
            is_deleted: false,
            sent_to_erp: false,
        }
    }

    pub fn phone(mut self, phone: Option<&str>) -> Self {
        self.phone = phone.map(str::to_string);
        self
    }

    pub fn payment(mut self, method: &str) -> Self {
        self.payment_method = method.to_string();
        self
    }

    pub fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    pub fn sent(mut self) -> Self {
        self.sent_to_erp = true;
        self
    }

    pub async fn insert(self, db: &DatabaseConnection) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sale_transaction::ActiveModel {
            id: Set(id),
            order_number: Set(self.order_number),
            transaction_date: Set(self.date),
            date_int: Set(date_to_int(self.date)),
            customer_phone: Set(self.phone),
            customer_name: Set(Some("Customer".to_string())),
            product_sku: Set(self.sku.clone()),
            product_name: Set(format!("Product {}", self.sku)),
            brand_name: Set(None),
            quantity: Set(self.quantity),
            unit_price: Set(self.unit_price),
            payment_method: Set(self.payment_method),
            is_deleted: Set(self.is_deleted),
            sent_to_erp: Set(self.sent_to_erp),
        }
        .insert(db)
        .await?;
        Ok(id)
    }
}

/// Inserts `count` single-line orders `SO-001..` on the same day, all using `sku`.
pub async fn seed_orders(db: &DatabaseConnection, count: usize, date: &str, sku: &str) -> Result<Vec<String>> {
    let mut numbers = Vec::with_capacity(count);
    for n in 1..=count {
        let number = format!("SO-{n:03}");
        SaleLine::new(&number, date, sku).insert(db).await?;
        numbers.push(number);
    }
    Ok(numbers)
}

/// Blocks the customer step of one order until released.
pub struct Gate {
    pub order_number: String,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct ErpState {
    next_id: i64,
    records: HashMap<(Step, String), i64>,
    created: HashMap<Step, usize>,
    calls: Vec<(Step, String)>,
    failures: HashMap<(Step, String), (StepError, Option<u32>)>,
}

/// In-process ERP keeping find-or-create semantics, with failure injection.
#[derive(Default)]
pub struct ScriptedErp {
    state: Mutex<ErpState>,
    gate: Mutex<Option<Gate>>,
}

impl ScriptedErp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails every call of `step` for `key` until cleared.
    pub fn fail(&self, step: Step, key: &str, error: StepError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((step, key.to_string()), (error, None));
    }

    /// Fails the next `times` calls of `step` for `key`.
    pub fn fail_times(&self, step: Step, key: &str, error: StepError, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((step, key.to_string()), (error, Some(times)));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Installs a gate on the customer step of `order_number`.
    pub fn gate(&self, order_number: &str) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Gate {
            order_number: order_number.to_string(),
            reached: reached.clone(),
            release: release.clone(),
        });
        (reached, release)
    }

    /// Lets later calls through; callers already waiting still need `release`.
    pub fn open_gate(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn created(&self, step: Step) -> usize {
        self.state.lock().unwrap().created.get(&step).copied().unwrap_or(0)
    }

    pub fn calls(&self, step: Step, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(s, k)| *s == step && k == key)
            .count()
    }

    /// Customer-step keys (order numbers) in call order.
    pub fn orders_started(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(s, _)| *s == Step::Customer)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn ensure(&self, step: Step, key: &str) -> Result<RemoteRecord, StepError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((step, key.to_string()));

        let failure_key = (step, key.to_string());
        if let Some((error, remaining)) = state.failures.get_mut(&failure_key) {
            let error = error.clone();
            match remaining {
                None => return Err(error),
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(error);
                }
            }
        }

        if let Some(id) = state.records.get(&failure_key) {
            return Ok(RemoteRecord::found(*id));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.records.insert(failure_key, id);
        *state.created.entry(step).or_default() += 1;
        Ok(RemoteRecord::created(id))
    }
}

#[async_trait]
impl ErpGateway for ScriptedErp {
    async fn ensure_customer(&self, order: &OrderAggregate) -> Result<RemoteRecord, StepError> {
        let gate = {
            let gate = self.gate.lock().unwrap();
            gate.as_ref()
                .filter(|g| g.order_number == order.order_number)
                .map(|g| (g.reached.clone(), g.release.clone()))
        };
        if let Some((reached, release)) = gate {
            reached.notify_one();
            release.notified().await;
        }
        // Keyed by order so tests can follow which orders were started
        self.ensure(Step::Customer, &order.order_number)
    }

    async fn ensure_brand(&self, brand: &str) -> Result<RemoteRecord, StepError> {
        self.ensure(Step::Brand, brand)
    }

    async fn ensure_product(&self, line: &OrderLine, _brand_id: i64) -> Result<RemoteRecord, StepError> {
        self.ensure(Step::Product, &line.sku)
    }

    async fn ensure_order(
        &self,
        order: &OrderAggregate,
        _customer_id: i64,
        _products: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError> {
        self.ensure(Step::Order, &order.order_number)
    }

    async fn ensure_purchase(
        &self,
        order: &OrderAggregate,
        _products: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError> {
        self.ensure(Step::Purchase, &order.order_number)
    }
}
