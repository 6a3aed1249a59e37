//! # Order sync engine
//!
//! Pushes locally recorded sales into the ERP through a staged pipeline:
//!
//! - [`aggregator`] groups eligible transaction lines into orders
//! - [`pipeline`] runs the customer, brand, product, order and purchase steps
//! - [`controller`] owns a job's lifecycle and checkpoints
//! - [`recorder`] writes the run/detail audit trail
//! - [`retry`] replays failed orders or steps
//! - [`worker`] claims pending jobs and runs them in the background

pub mod aggregator;
pub mod classifier;
pub mod controller;
pub mod notifier;
pub mod pipeline;
pub mod recorder;
pub mod retry;
pub mod step;
pub mod window;
pub mod worker;

pub use aggregator::{OrderAggregate, OrderAggregator, OrderLine};
pub use classifier::{FailureClass, FailureClassifier};
pub use controller::{JobController, JobReport};
pub use notifier::{Notifier, NotifyOutcome};
pub use pipeline::{OrderOutcome, PipelineRunner, StepPolicy, StopCheck};
pub use recorder::{JobLease, Progress, RunRecorder};
pub use retry::{RetryCoordinator, RetryResult, RetryScope, RetrySummary};
pub use step::{
    ErpGateway, RemoteRecord, Step, StepError, StepErrorKind, StepStates, StepStatus, SyncStatus,
};
pub use window::SyncWindow;
pub use worker::SyncWorker;
