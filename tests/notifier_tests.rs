//! Completion summaries delivered through the HTTP mail transport.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use order_sync::config::MailConfig;
use order_sync::mail::HttpMailTransport;
use order_sync::sync::{JobController, Notifier, NotifyOutcome};
use serde_json::json;
use test_utils::*;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn notifier(server: &MockServer, max_attempts: u32) -> Notifier {
    let config = MailConfig {
        api_base: Some(format!("{}/v1", server.uri())),
        timeout_seconds: 5,
        max_attempts,
    };
    let transport = HttpMailTransport::from_config(&config)
        .unwrap()
        .expect("mail configured")
        .with_initial_delay(Duration::from_millis(1));
    Notifier::new(Some(Arc::new(transport)))
}

#[tokio::test]
async fn test_completed_job_sends_summary_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .and(header("authorization", "Bearer mail-token"))
        .and(body_partial_json(json!({
            "from": "sync@example.com",
            "to": ["owner@example.com"],
            "subject": "Order sync completed for 2024-05-01 to 2024-05-31"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    insert_mail_credential(&db, "owner-1").await.unwrap();
    insert_product(&db, "SKU-A", Some("Acme"), None, false).await.unwrap();
    seed_orders(&db, 2, "2024-05-10", "SKU-A").await.unwrap();

    let notifier = notifier(&server, 3);
    let controller = JobController::new(
        db.clone(),
        &test_config(),
        ScriptedErp::new(),
        notifier.clone(),
    );
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();

    let job = controller.jobs().get(job.id).await.unwrap();
    assert!(job.email_sent);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Total orders: 2"));
    assert!(text.contains("Successful: 2"));

    // Already flagged: a second notification is a no-op
    assert_eq!(
        notifier.notify_completion(&db, &job).await,
        NotifyOutcome::NotApplicable
    );
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    insert_mail_credential(&db, "owner-1").await.unwrap();
    let controller = JobController::new(
        db.clone(),
        &test_config(),
        ScriptedErp::new(),
        notifier(&server, 3),
    );
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();

    assert!(controller.jobs().get(job.id).await.unwrap().email_sent);
}

#[tokio::test]
async fn test_exhausted_delivery_leaves_flag_unset() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    insert_mail_credential(&db, "owner-1").await.unwrap();
    let controller = JobController::new(
        db.clone(),
        &test_config(),
        ScriptedErp::new(),
        Notifier::disabled(),
    );
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    let report = controller.execute(job.id).await.unwrap();
    assert_eq!(report.status.as_str(), "completed");

    let job = controller.jobs().get(job.id).await.unwrap();
    let outcome = notifier(&server, 2).notify_completion(&db, &job).await;
    assert_eq!(outcome, NotifyOutcome::Failed);
    assert!(!controller.jobs().get(job.id).await.unwrap().email_sent);
}

#[tokio::test]
async fn test_client_rejection_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .expect(1)
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    insert_mail_credential(&db, "owner-1").await.unwrap();
    let controller = JobController::new(
        db.clone(),
        &test_config(),
        ScriptedErp::new(),
        Notifier::disabled(),
    );
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();

    let job = controller.jobs().get(job.id).await.unwrap();
    let outcome = notifier(&server, 3).notify_completion(&db, &job).await;
    assert_eq!(outcome, NotifyOutcome::Failed);
}

#[tokio::test]
async fn test_owner_without_credentials_gets_no_mail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    let controller = JobController::new(
        db.clone(),
        &test_config(),
        ScriptedErp::new(),
        notifier(&server, 3),
    );
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.execute(job.id).await.unwrap();

    assert!(!controller.jobs().get(job.id).await.unwrap().email_sent);
}

#[tokio::test]
async fn test_only_completed_jobs_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let db = setup_test_db().await.unwrap();
    insert_mail_credential(&db, "owner-1").await.unwrap();
    let notifier = notifier(&server, 3);
    let controller = JobController::new(
        db.clone(),
        &test_config(),
        ScriptedErp::new(),
        notifier.clone(),
    );
    let job = controller.start(new_job("2024-05-01", "2024-05-31")).await.unwrap();
    controller.cancel(job.id).await.unwrap();

    let job = controller.jobs().get(job.id).await.unwrap();
    assert_eq!(
        notifier.notify_completion(&db, &job).await,
        NotifyOutcome::NotApplicable
    );
}
