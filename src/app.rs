//! Wiring of the production collaborators into a [`JobController`].

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::erp::OdooGateway;
use crate::mail::{HttpMailTransport, MailTransport};
use crate::sync::{JobController, Notifier};

/// Builds a controller backed by the Odoo gateway and, when a mail API is
/// configured, the HTTP mail transport.
pub fn build_controller(
    config: &AppConfig,
    db: &DatabaseConnection,
) -> anyhow::Result<JobController> {
    let erp = Arc::new(OdooGateway::new(&config.erp)?);

    let notifier = match HttpMailTransport::from_config(&config.mail)? {
        Some(transport) => Notifier::new(Some(Arc::new(transport) as Arc<dyn MailTransport>)),
        None => {
            tracing::info!("Mail API not configured; completion summaries are disabled");
            Notifier::disabled()
        }
    };

    Ok(JobController::new(db.clone(), config, erp, notifier))
}
