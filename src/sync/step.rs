//! Pipeline steps, their recorded statuses and the ERP seam they call through.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::aggregator::{OrderAggregate, OrderLine};

/// One of the five remote-sync operations, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Customer,
    Brand,
    Product,
    Order,
    Purchase,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::Customer,
        Step::Brand,
        Step::Product,
        Step::Order,
        Step::Purchase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Customer => "customer",
            Step::Brand => "brand",
            Step::Product => "product",
            Step::Order => "order",
            Step::Purchase => "purchase",
        }
    }

    /// Steps whose remote ids this step consumes.
    pub fn prerequisites(&self) -> &'static [Step] {
        match self {
            Step::Customer | Step::Brand => &[],
            Step::Product => &[Step::Brand],
            Step::Order => &[Step::Customer, Step::Product],
            Step::Purchase => &[Step::Brand, Step::Product],
        }
    }

    /// This step preceded by every transitive prerequisite, in pipeline order.
    pub fn with_prerequisites(&self) -> Vec<Step> {
        let mut needed = vec![*self];
        let mut frontier = vec![*self];
        while let Some(step) = frontier.pop() {
            for prerequisite in step.prerequisites() {
                if !needed.contains(prerequisite) {
                    needed.push(*prerequisite);
                    frontier.push(*prerequisite);
                }
            }
        }
        needed.sort();
        needed
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "customer" => Ok(Step::Customer),
            "brand" => Ok(Step::Brand),
            "product" => Ok(Step::Product),
            "order" => Ok(Step::Order),
            "purchase" => Ok(Step::Purchase),
            other => Err(format!("unknown step '{other}'")),
        }
    }
}

/// Recorded outcome of a single step on a detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    /// Entity already existed in the ERP
    Found,
    /// Entity was created by this step
    Created,
    /// Document (sale or purchase order) exists and is confirmed
    Sent,
    Failed,
    /// Step does not apply to this order
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Found => "found",
            StepStatus::Created => "created",
            StepStatus::Sent => "sent",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether the step needs no further work.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            StepStatus::Found | StepStatus::Created | StepStatus::Sent | StepStatus::Skipped
        )
    }

    /// Unknown strings read back from storage are treated as `pending` so the
    /// step is attempted again instead of silently counted as done.
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "found" => StepStatus::Found,
            "created" => StepStatus::Created,
            "sent" => StepStatus::Sent,
            "failed" => StepStatus::Failed,
            "skipped" => StepStatus::Skipped,
            _ => StepStatus::Pending,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step statuses of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct StepStates {
    pub customer: StepStatus,
    pub brand: StepStatus,
    pub product: StepStatus,
    pub order: StepStatus,
    pub purchase: StepStatus,
}

impl StepStates {
    pub fn get(&self, step: Step) -> StepStatus {
        match step {
            Step::Customer => self.customer,
            Step::Brand => self.brand,
            Step::Product => self.product,
            Step::Order => self.order,
            Step::Purchase => self.purchase,
        }
    }

    pub fn set(&mut self, step: Step, status: StepStatus) {
        match step {
            Step::Customer => self.customer = status,
            Step::Brand => self.brand = status,
            Step::Product => self.product = status,
            Step::Order => self.order = status,
            Step::Purchase => self.purchase = status,
        }
    }

    /// First step that has not run yet.
    pub fn first_pending(&self) -> Option<Step> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| self.get(*step) == StepStatus::Pending)
    }

    pub fn any_failed(&self) -> bool {
        Step::ALL.iter().any(|step| self.get(*step) == StepStatus::Failed)
    }

    /// Derives the detail row's overall status from the step fields.
    ///
    /// A committed remote document (order or purchase sent) next to an
    /// unfinished step makes the order `partial` rather than `failed`.
    pub fn sync_status(&self) -> SyncStatus {
        if Step::ALL.iter().all(|step| self.get(*step).is_done()) {
            return SyncStatus::Success;
        }
        if self.order == StepStatus::Sent || self.purchase == StepStatus::Sent {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        }
    }
}

/// Overall outcome of an order on its detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    Partial,
    /// Failure outside the step pipeline (e.g. the order vanished before a retry)
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Partial => "partial",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "success" => SyncStatus::Success,
            "partial" => SyncStatus::Partial,
            "error" => SyncStatus::Error,
            _ => SyncStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Success)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a step failure, driving in-place retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// Local data cannot be sent (missing brand, phone, supplier...)
    Validation,
    /// Network failure, rate limiting or remote 5xx
    Transient,
    /// Remote rejected the request
    Remote,
    /// No answer within the step timeout
    Timeout,
}

impl StepErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepErrorKind::Validation => "validation",
            StepErrorKind::Transient => "transient",
            StepErrorKind::Remote => "remote",
            StepErrorKind::Timeout => "timeout",
        }
    }
}

/// A failed step of one order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{step} step failed: {message}")]
pub struct StepError {
    pub step: Step,
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn validation<S: Into<String>>(step: Step, message: S) -> Self {
        Self {
            step,
            kind: StepErrorKind::Validation,
            message: message.into(),
        }
    }

    pub fn transient<S: Into<String>>(step: Step, message: S) -> Self {
        Self {
            step,
            kind: StepErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn remote<S: Into<String>>(step: Step, message: S) -> Self {
        Self {
            step,
            kind: StepErrorKind::Remote,
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(step: Step, message: S) -> Self {
        Self {
            step,
            kind: StepErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, StepErrorKind::Transient | StepErrorKind::Timeout)
    }
}

/// Id of an ERP record and whether this call created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteRecord {
    pub id: i64,
    pub created: bool,
}

impl RemoteRecord {
    pub fn found(id: i64) -> Self {
        Self { id, created: false }
    }

    pub fn created(id: i64) -> Self {
        Self { id, created: true }
    }
}

/// Remote ids resolved so far for one order, keyed the way later steps need them.
#[derive(Debug, Clone, Default)]
pub struct RemoteIds {
    pub customer: Option<i64>,
    /// brand name -> category id
    pub brands: HashMap<String, i64>,
    /// sku -> product id
    pub products: HashMap<String, i64>,
}

/// Remote ERP seam: five idempotent find-or-create operations.
///
/// Implementations must look the entity up by its natural key before creating
/// it, so calling any method twice yields the same record.
#[async_trait]
pub trait ErpGateway: Send + Sync {
    /// Partner keyed by the order's customer phone.
    async fn ensure_customer(&self, order: &OrderAggregate) -> Result<RemoteRecord, StepError>;

    /// Product category keyed by brand name.
    async fn ensure_brand(&self, brand_name: &str) -> Result<RemoteRecord, StepError>;

    /// Product keyed by SKU, filed under the given category.
    async fn ensure_product(
        &self,
        line: &OrderLine,
        brand_id: i64,
    ) -> Result<RemoteRecord, StepError>;

    /// Confirmed sale order keyed by the order number.
    async fn ensure_order(
        &self,
        order: &OrderAggregate,
        customer_id: i64,
        product_ids: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError>;

    /// Purchase order(s) for the order's non-stock lines, keyed by the order number.
    async fn ensure_purchase(
        &self,
        order: &OrderAggregate,
        product_ids: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisite_closure() {
        assert_eq!(Step::Customer.with_prerequisites(), vec![Step::Customer]);
        assert_eq!(
            Step::Product.with_prerequisites(),
            vec![Step::Brand, Step::Product]
        );
        assert_eq!(
            Step::Order.with_prerequisites(),
            vec![Step::Customer, Step::Brand, Step::Product, Step::Order]
        );
        assert_eq!(
            Step::Purchase.with_prerequisites(),
            vec![Step::Brand, Step::Product, Step::Purchase]
        );
    }

    #[test]
    fn test_sync_status_derivation() {
        let mut states = StepStates {
            customer: StepStatus::Found,
            brand: StepStatus::Created,
            product: StepStatus::Found,
            order: StepStatus::Sent,
            purchase: StepStatus::Skipped,
        };
        assert_eq!(states.sync_status(), SyncStatus::Success);

        states.purchase = StepStatus::Failed;
        assert_eq!(states.sync_status(), SyncStatus::Partial);

        states.purchase = StepStatus::Pending;
        assert_eq!(states.sync_status(), SyncStatus::Partial);
        assert_eq!(states.first_pending(), Some(Step::Purchase));

        let states = StepStates {
            customer: StepStatus::Found,
            brand: StepStatus::Failed,
            ..StepStates::default()
        };
        assert_eq!(states.sync_status(), SyncStatus::Failed);
        assert_eq!(states.first_pending(), Some(Step::Product));
    }

    #[test]
    fn test_status_strings_round_trip_through_storage() {
        for status in [
            StepStatus::Pending,
            StepStatus::Found,
            StepStatus::Created,
            StepStatus::Sent,
            StepStatus::Failed,
            StepStatus::Skipped,
        ] {
            assert_eq!(StepStatus::parse_lossy(status.as_str()), status);
        }
        assert_eq!(StepStatus::parse_lossy("bogus"), StepStatus::Pending);
    }

    #[test]
    fn test_step_error_retryability() {
        assert!(StepError::transient(Step::Order, "503").is_retryable());
        assert!(StepError::timeout(Step::Order, "30s").is_retryable());
        assert!(!StepError::remote(Step::Order, "bad partner").is_retryable());
        assert!(!StepError::validation(Step::Brand, "no brand").is_retryable());

        let err = StepError::validation(Step::Brand, "product SKU-1 has no brand");
        assert_eq!(err.to_string(), "brand step failed: product SKU-1 has no brand");
    }
}
