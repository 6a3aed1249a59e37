//! Decides which part of a failed order a retry should target.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::step::{StepStates, StepStatus, SyncStatus};
use crate::config::ClassifierConfig;
use crate::models::sync_run_detail;
use crate::sync::recorder::step_states;

/// Failure scope of a detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Order,
    Purchase,
    Both,
    Other,
    None,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Order => "order",
            FailureClass::Purchase => "purchase",
            FailureClass::Both => "both",
            FailureClass::Other => "other",
            FailureClass::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureClassifier {
    purchase_keywords: Vec<String>,
    order_keywords: Vec<String>,
}

impl FailureClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let normalized = config.normalized();
        Self {
            purchase_keywords: normalized.purchase_keywords,
            order_keywords: normalized.order_keywords,
        }
    }

    pub fn classify_detail(&self, detail: &sync_run_detail::Model) -> FailureClass {
        self.classify(
            SyncStatus::parse_lossy(&detail.sync_status),
            &step_states(detail),
            detail.error_message.as_deref(),
        )
    }

    /// Step fields first, keyword fallbacks last.
    pub fn classify(
        &self,
        status: SyncStatus,
        steps: &StepStates,
        error: Option<&str>,
    ) -> FailureClass {
        if status.is_success() {
            return FailureClass::None;
        }

        let error = error
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase);
        let mentions = |keywords: &[String]| {
            error
                .as_deref()
                .is_some_and(|e| keywords.iter().any(|k| e.contains(k.as_str())))
        };

        if steps.order == StepStatus::Failed {
            return if steps.purchase == StepStatus::Failed {
                FailureClass::Both
            } else {
                FailureClass::Order
            };
        }

        // An order in the ERP with its purchase never attempted only needs the purchase
        if steps.purchase == StepStatus::Failed
            || (steps.purchase == StepStatus::Pending
                && (steps.order.is_done() || mentions(&self.purchase_keywords)))
        {
            return FailureClass::Purchase;
        }

        if [steps.customer, steps.brand, steps.product].contains(&StepStatus::Failed) {
            return FailureClass::Other;
        }

        if mentions(&self.purchase_keywords) {
            FailureClass::Purchase
        } else if mentions(&self.order_keywords) {
            FailureClass::Order
        } else if error.is_some() {
            FailureClass::Other
        } else {
            FailureClass::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FailureClassifier {
        FailureClassifier::new(&ClassifierConfig::default())
    }

    fn states(order: StepStatus, purchase: StepStatus) -> StepStates {
        StepStates {
            customer: StepStatus::Found,
            brand: StepStatus::Found,
            product: StepStatus::Found,
            order,
            purchase,
        }
    }

    #[test]
    fn test_order_failure_dominates() {
        let c = classifier();
        assert_eq!(
            c.classify(
                SyncStatus::Failed,
                &states(StepStatus::Failed, StepStatus::Pending),
                Some("order step failed: supplier missing"),
            ),
            FailureClass::Order
        );
        assert_eq!(
            c.classify(
                SyncStatus::Failed,
                &states(StepStatus::Failed, StepStatus::Failed),
                None,
            ),
            FailureClass::Both
        );
    }

    #[test]
    fn test_purchase_failures() {
        let c = classifier();
        assert_eq!(
            c.classify(
                SyncStatus::Partial,
                &states(StepStatus::Sent, StepStatus::Failed),
                Some("purchase step failed: 500"),
            ),
            FailureClass::Purchase
        );
        assert_eq!(
            c.classify(
                SyncStatus::Failed,
                &states(StepStatus::Pending, StepStatus::Pending),
                Some("Supplier lookup timed out"),
            ),
            FailureClass::Purchase
        );
    }

    #[test]
    fn test_sent_order_with_pending_purchase_targets_purchase() {
        let c = classifier();
        // The message still names the order step from an earlier failure
        assert_eq!(
            c.classify(
                SyncStatus::Partial,
                &states(StepStatus::Sent, StepStatus::Pending),
                Some("order step failed: rejected by remote"),
            ),
            FailureClass::Purchase
        );
        assert_eq!(
            c.classify(
                SyncStatus::Partial,
                &states(StepStatus::Found, StepStatus::Pending),
                None,
            ),
            FailureClass::Purchase
        );
    }

    #[test]
    fn test_upstream_step_failure_is_other() {
        let c = classifier();
        let steps = StepStates {
            customer: StepStatus::Found,
            brand: StepStatus::Failed,
            ..StepStates::default()
        };
        assert_eq!(
            c.classify(SyncStatus::Failed, &steps, Some("brand step failed: order brand")),
            FailureClass::Other
        );
    }

    #[test]
    fn test_keyword_fallbacks() {
        let c = classifier();
        let steps = StepStates::default();
        assert_eq!(
            c.classify(SyncStatus::Error, &steps, Some("order vanished")),
            FailureClass::Order
        );
        assert_eq!(
            c.classify(SyncStatus::Error, &steps, Some("connection reset")),
            FailureClass::Other
        );
        assert_eq!(
            c.classify(SyncStatus::Failed, &steps, Some("   ")),
            FailureClass::None
        );
    }

    #[test]
    fn test_success_is_never_classified() {
        let c = classifier();
        assert_eq!(
            c.classify(
                SyncStatus::Success,
                &states(StepStatus::Failed, StepStatus::Failed),
                Some("order"),
            ),
            FailureClass::None
        );
    }

    #[test]
    fn test_custom_keywords() {
        let c = FailureClassifier::new(&ClassifierConfig {
            purchase_keywords: vec!["Vendor".to_string()],
            order_keywords: vec!["sale".to_string()],
        });
        let steps = StepStates::default();
        assert_eq!(
            c.classify(SyncStatus::Error, &steps, Some("vendor rejected")),
            FailureClass::Purchase
        );
        assert_eq!(
            c.classify(SyncStatus::Error, &steps, Some("SALE locked")),
            FailureClass::Order
        );
    }
}
