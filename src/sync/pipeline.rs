//! Per-order step state machine.
//!
//! `customer → brand → product → order → purchase`, fail-fast: the first
//! failing step leaves every later step `pending`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::{Rng, thread_rng};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::aggregator::OrderAggregate;
use super::step::{
    ErpGateway, RemoteIds, RemoteRecord, Step, StepError, StepStates, StepStatus,
};
use crate::config::WorkerConfig;

/// Timeout and in-place retry policy applied to every step call.
#[derive(Debug, Clone)]
pub struct StepPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_factor: f64,
}

impl StepPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.step_timeout_seconds),
            max_attempts: config.step_max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the next attempt after `failed_attempts` failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(30) as i32;
        let backoff = (self.backoff_base_ms as f64 * 2_f64.powi(exponent))
            .min(self.backoff_max_ms as f64);

        let jitter = if self.jitter_factor > 0.0 && backoff > 0.0 {
            thread_rng().gen_range(0.0..(self.jitter_factor * backoff))
        } else {
            0.0
        };

        Duration::from_millis((backoff + jitter) as u64)
    }
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Lets the pipeline ask, between steps, whether the job should stop.
#[async_trait]
pub trait StopCheck: Send + Sync {
    async fn stop_requested(&self) -> bool;
}

/// Result of running some steps of one order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub steps: StepStates,
    pub error: Option<StepError>,
    /// Set when a stop request was observed before this step ran
    pub interrupted_before: Option<Step>,
}

impl OrderOutcome {
    /// Main-run success: every executed step succeeded and nothing was interrupted.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.interrupted_before.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.to_string());
        }
        self.interrupted_before
            .map(|step| format!("interrupted before {step} step"))
    }
}

/// Runs pipeline steps for one order against an [`ErpGateway`].
#[derive(Clone)]
pub struct PipelineRunner {
    erp: Arc<dyn ErpGateway>,
    policy: StepPolicy,
}

impl PipelineRunner {
    pub fn new(erp: Arc<dyn ErpGateway>, policy: StepPolicy) -> Self {
        Self { erp, policy }
    }

    /// Runs the full pipeline from a clean slate.
    pub async fn run_order(
        &self,
        order: &OrderAggregate,
        check: Option<&dyn StopCheck>,
    ) -> OrderOutcome {
        self.run_steps(order, &Step::ALL, StepStates::default(), check)
            .await
    }

    /// Runs `steps` in order on top of `states`, overwriting each executed
    /// step's status. Steps not listed keep their incoming status.
    pub async fn run_steps(
        &self,
        order: &OrderAggregate,
        steps: &[Step],
        mut states: StepStates,
        check: Option<&dyn StopCheck>,
    ) -> OrderOutcome {
        let mut ids = RemoteIds::default();

        for (position, step) in steps.iter().copied().enumerate() {
            if position > 0
                && let Some(check) = check
                && check.stop_requested().await
            {
                debug!(order_number = %order.order_number, %step, "Stop observed between steps");
                return OrderOutcome {
                    steps: states,
                    error: None,
                    interrupted_before: Some(step),
                };
            }

            match self.run_step(step, order, &mut ids).await {
                Ok(status) => states.set(step, status),
                Err(error) => {
                    counter!(
                        "order_sync_step_failures_total",
                        "step" => step.as_str(),
                        "kind" => error.kind.as_str()
                    )
                    .increment(1);
                    warn!(
                        order_number = %order.order_number,
                        %step,
                        kind = error.kind.as_str(),
                        "Step failed: {}",
                        error.message
                    );
                    states.set(step, StepStatus::Failed);
                    return OrderOutcome {
                        steps: states,
                        error: Some(error),
                        interrupted_before: None,
                    };
                }
            }
        }

        OrderOutcome {
            steps: states,
            error: None,
            interrupted_before: None,
        }
    }

    async fn run_step(
        &self,
        step: Step,
        order: &OrderAggregate,
        ids: &mut RemoteIds,
    ) -> Result<StepStatus, StepError> {
        let erp = self.erp.as_ref();

        match step {
            Step::Customer => {
                let record = self
                    .call_with_policy(step, move || erp.ensure_customer(order))
                    .await?;
                ids.customer = Some(record.id);
                Ok(found_or_created(&[record]))
            }
            Step::Brand => {
                if let Some(line) = order.lines.iter().find(|line| line.brand_name.is_none()) {
                    return Err(StepError::validation(
                        step,
                        format!("product {} has no brand", line.sku),
                    ));
                }

                let mut records = Vec::new();
                for brand in order.brand_names() {
                    let record = self
                        .call_with_policy(step, move || erp.ensure_brand(brand))
                        .await?;
                    ids.brands.insert(brand.to_string(), record.id);
                    records.push(record);
                }
                Ok(found_or_created(&records))
            }
            Step::Product => {
                let mut records = Vec::new();
                for line in order.distinct_products() {
                    let brand_id = line
                        .brand_name
                        .as_ref()
                        .and_then(|brand| ids.brands.get(brand))
                        .copied()
                        .ok_or_else(|| {
                            StepError::validation(
                                step,
                                format!("brand of product {} is not resolved", line.sku),
                            )
                        })?;
                    let record = self
                        .call_with_policy(step, move || erp.ensure_product(line, brand_id))
                        .await?;
                    ids.products.insert(line.sku.clone(), record.id);
                    records.push(record);
                }
                Ok(found_or_created(&records))
            }
            Step::Order => {
                let customer_id = ids.customer.ok_or_else(|| {
                    StepError::validation(step, "customer is not resolved")
                })?;
                let products = &ids.products;
                self.call_with_policy(step, move || {
                    erp.ensure_order(order, customer_id, products)
                })
                .await?;
                Ok(StepStatus::Sent)
            }
            Step::Purchase => {
                if !order.has_non_stock_lines {
                    return Ok(StepStatus::Skipped);
                }
                if let Some(line) = order.non_stock_lines().find(|l| l.supplier_name.is_none()) {
                    return Err(StepError::validation(
                        step,
                        format!("non-stock product {} has no supplier", line.sku),
                    ));
                }
                let products = &ids.products;
                self.call_with_policy(step, move || erp.ensure_purchase(order, products))
                    .await?;
                Ok(StepStatus::Sent)
            }
        }
    }

    /// Invokes `call` under the step timeout, retrying transient failures
    /// with exponential backoff and jitter.
    async fn call_with_policy<F, Fut, T>(&self, step: Step, mut call: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StepError::timeout(
                    step,
                    format!("no response within {}s", self.policy.timeout.as_secs()),
                )),
            };

            match result {
                Err(error) if error.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    counter!("order_sync_step_attempts_total", "step" => step.as_str())
                        .increment(1);
                    debug!(
                        %step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying step after transient failure: {}",
                        error.message
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn found_or_created(records: &[RemoteRecord]) -> StepStatus {
    if records.iter().any(|record| record.created) {
        StepStatus::Created
    } else {
        StepStatus::Found
    }
}
