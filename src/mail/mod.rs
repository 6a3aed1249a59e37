//! Completion summary mail
//!
//! The sync engine talks to mail delivery through [`MailTransport`]; the
//! production transport posts to a transactional mail HTTP API.

pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

pub use http::HttpMailTransport;

/// Mail delivery errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail API rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("mail API unreachable: {0}")]
    Transport(String),
    #[error("mail delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Numbers reported to the owner when a job completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSummary {
    pub owner_name: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub total_orders: i32,
    pub successful_orders: i32,
    pub failed_orders: i32,
    pub skipped_orders: i32,
    pub duration_seconds: i64,
}

impl CompletionSummary {
    pub fn subject(&self) -> String {
        format!(
            "Order sync completed for {} to {}",
            self.from_date, self.to_date
        )
    }

    pub fn body(&self) -> String {
        format!(
            "Hello {},\n\n\
             The order sync for {} to {} has completed.\n\n\
             Total orders: {}\n\
             Successful: {}\n\
             Failed: {}\n\
             Skipped: {}\n\
             Duration: {}\n",
            self.owner_name,
            self.from_date,
            self.to_date,
            self.total_orders,
            self.successful_orders,
            self.failed_orders,
            self.skipped_orders,
            format_duration(self.duration_seconds),
        )
    }
}

/// Message handed to a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl OutgoingMail {
    pub fn completion(from: &str, to: &str, summary: &CompletionSummary) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            subject: summary.subject(),
            text: summary.body(),
        }
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver `mail`, authenticating with the sender's `api_token`.
    async fn send(&self, api_token: &str, mail: &OutgoingMail) -> Result<(), MailError>;
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    if minutes == 0 {
        format!("{seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}
