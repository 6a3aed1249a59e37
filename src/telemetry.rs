//! Telemetry: global subscriber setup, task-scoped trace context and metric
//! descriptions.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Correlation id carried by the task executing a request or a job.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Context for a worker task executing the given job.
    pub fn for_job(job_id: Uuid) -> Self {
        Self {
            trace_id: format!("job-{job_id}"),
        }
    }

    /// Fresh context for an inbound request.
    pub fn for_request() -> Self {
        Self {
            trace_id: format!("req-{}", Uuid::new_v4().simple()),
        }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing/logging exactly once, wiring `log::` macros into the tracing pipeline.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    // sqlx and reqwest log through `log::`
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: Failed to install log tracer bridge: {}. `log::` records will not reach the subscriber.",
                err
            );
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: Failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
    }

    describe_metrics();

    Ok(())
}

/// Register descriptions for the metrics emitted by the sync engine.
fn describe_metrics() {
    metrics::describe_counter!(
        "order_sync_orders_total",
        "Orders processed by the sync pipeline, labelled by outcome"
    );
    metrics::describe_counter!(
        "order_sync_step_failures_total",
        "Pipeline step failures, labelled by step and error kind"
    );
    metrics::describe_counter!(
        "order_sync_step_attempts_total",
        "In-place step retries after transient failures"
    );
    metrics::describe_counter!(
        "order_sync_jobs_total",
        "Sync jobs that reached a stop, labelled by final status"
    );
    metrics::describe_counter!(
        "order_sync_retries_total",
        "Retry coordinator invocations, labelled by scope and outcome"
    );
    metrics::describe_histogram!(
        "order_sync_job_duration_seconds",
        metrics::Unit::Seconds,
        "Wall-clock duration of one job execution"
    );
    metrics::describe_counter!(
        "order_sync_notifications_total",
        "Completion summaries, labelled by delivery outcome"
    );
    metrics::describe_gauge!(
        "order_sync_jobs_in_flight",
        "Jobs currently executing on this worker"
    );
    metrics::describe_histogram!(
        "order_sync_worker_tick_duration_ms",
        "Time spent claiming and spawning jobs per worker tick"
    );
}

/// Execute `future` within the provided trace context, making it available through task-local
/// storage for the duration of the request or job.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Get the currently active trace ID, if one has been set for the running task.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trace_context_scoped_to_future() {
        assert!(current_trace_id().is_none());

        let job_id = Uuid::new_v4();
        let seen = with_trace_context(TraceContext::for_job(job_id), async {
            current_trace_id()
        })
        .await;

        assert_eq!(seen, Some(format!("job-{job_id}")));
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn test_request_context_prefix() {
        let context = TraceContext::for_request();
        assert!(context.trace_id.starts_with("req-"));
        assert_eq!(context.trace_id.len(), 4 + 32);
    }
}
