//! End-to-end scenarios against [`blaize_queue::QueueService`] backed by
//! [`blaize_queue::InMemoryStorage`]. Mirrors the job-queue's concrete
//! worked examples: typed happy path, input/output rejection, retry with
//! backoff, cancellation, priority ordering, and subscriber fan-out.

use blaize_queue::{
    define_job, permanent, AddOptions, Callbacks, QueueConfig, QueueError, QueuePluginConfig,
    QueueService, Schema,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod support {
    use super::*;
    use blaize_queue::validation::rules::{EmailRule, Integer, IsString, Required};

    pub fn email_schema() -> Arc<Schema> {
        Arc::new(Schema::new().field("to", vec![Arc::new(Required), Arc::new(EmailRule)]).field(
            "subject",
            vec![Arc::new(Required), Arc::new(IsString)],
        ))
    }

    pub fn send_result_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .field("messageId", vec![Arc::new(Required), Arc::new(IsString)])
                .field("sentAt", vec![Arc::new(Required), Arc::new(Integer)]),
        )
    }
}

async fn wait_until_job<F>(service: &QueueService, job_id: &str, timeout: Duration, predicate: F)
where
    F: Fn(blaize_queue::JobStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = service.get_job(job_id).await.unwrap() {
            if predicate(job.status) {
                return;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {job_id} did not reach the expected status within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition did not become true within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scenario 1: happy path, typed output.
#[tokio::test]
async fn happy_path_produces_typed_completed_result() {
    let definition = define_job("emails", "email:send")
        .input(support::email_schema())
        .output(support::send_result_schema())
        .handler(|ctx| async move {
            let to = ctx.data["to"].as_str().unwrap().to_string();
            Ok::<_, anyhow::Error>(json!({
                "messageId": format!("msg-for-{to}"),
                "sentAt": chrono::Utc::now().timestamp_millis(),
            }))
        })
        .build()
        .unwrap();

    let service = Arc::new(QueueService::builder().register(definition).build().unwrap());
    service.start_all();

    let job_id = service
        .add("emails", "email:send", json!({"to": "u@e.com", "subject": "Hi"}), AddOptions::default())
        .await
        .unwrap();

    wait_until_job(&service, &job_id, Duration::from_secs(2), |status| {
        status == blaize_queue::JobStatus::Completed
    })
    .await;

    let job = service.get_job(&job_id).await.unwrap().unwrap();
    let result = job.result.unwrap();
    assert!(result["messageId"].as_str().unwrap().starts_with("msg-for-"));
    assert!(result["sentAt"].as_i64().unwrap() <= chrono::Utc::now().timestamp_millis());

    service.stop_all(true).await;
}

/// Scenario 2: input rejection at enqueue — no job is ever created.
#[tokio::test]
async fn invalid_input_is_rejected_before_a_job_is_created() {
    let definition = define_job("emails", "email:send")
        .input(support::email_schema())
        .handler(|ctx| async move { Ok::<_, anyhow::Error>(ctx.data.clone()) })
        .build()
        .unwrap();
    let service = QueueService::builder().register(definition).build().unwrap();

    let err = service
        .add("emails", "email:send", json!({"to": "not-an-email", "subject": "T"}), AddOptions::default())
        .await;

    assert!(matches!(
        err,
        Err(QueueError::JobValidation { stage: blaize_queue::ValidationStage::Enqueue, .. })
    ));
}

/// Scenario 3: output rejection — terminal `failed`, `VALIDATION_ERROR`,
/// exactly one attempt.
#[tokio::test]
async fn output_rejection_fails_without_retry() {
    let definition = define_job("emails", "email:send")
        .output(support::send_result_schema())
        .max_retries(0)
        .handler(|_ctx| async move { Ok::<_, anyhow::Error>(json!({"result": 42})) })
        .build()
        .unwrap();
    let service = Arc::new(QueueService::builder().register(definition).build().unwrap());
    service.start_all();

    let job_id = service.add("emails", "email:send", json!({}), AddOptions::default()).await.unwrap();

    wait_until_job(&service, &job_id, Duration::from_secs(2), |status| {
        status == blaize_queue::JobStatus::Failed
    })
    .await;

    let job = service.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error.unwrap().code.as_deref(), Some("VALIDATION_ERROR"));

    service.stop_all(true).await;
}

/// Scenario 4: retry with exponential backoff — fails twice, succeeds on
/// the third attempt.
#[tokio::test]
async fn handler_retries_until_success_within_attempt_budget() {
    let attempt = Arc::new(AtomicU32::new(0));
    let attempt_clone = attempt.clone();
    let definition = define_job("emails", "email:send")
        .max_retries(2)
        .handler(move |_ctx| {
            let attempt = attempt_clone.clone();
            async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    anyhow::bail!("transient failure on attempt {n}");
                }
                Ok::<_, anyhow::Error>(json!({"ok": true}))
            }
        })
        .build()
        .unwrap();
    let service = Arc::new(QueueService::builder().register(definition).build().unwrap());
    service.start_all();

    let job_id = service.add("emails", "email:send", json!({}), AddOptions::default()).await.unwrap();

    wait_until_job(&service, &job_id, Duration::from_secs(5), |status| {
        status == blaize_queue::JobStatus::Completed
    })
    .await;

    let job = service.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 3);
    assert_eq!(attempt.load(Ordering::SeqCst), 3);

    service.stop_all(true).await;
}

/// A permanently-marked handler error must never be retried, even with
/// retry budget remaining.
#[tokio::test]
async fn permanent_error_is_never_retried() {
    let attempt = Arc::new(AtomicU32::new(0));
    let attempt_clone = attempt.clone();
    let definition = define_job("emails", "email:send")
        .max_retries(5)
        .handler(move |_ctx| {
            let attempt = attempt_clone.clone();
            async move {
                attempt.fetch_add(1, Ordering::SeqCst);
                Err::<serde_json::Value, _>(permanent(anyhow::anyhow!("downstream rejected the request")))
            }
        })
        .build()
        .unwrap();
    let service = Arc::new(QueueService::builder().register(definition).build().unwrap());
    service.start_all();

    let job_id = service.add("emails", "email:send", json!({}), AddOptions::default()).await.unwrap();

    wait_until_job(&service, &job_id, Duration::from_secs(2), |status| {
        status == blaize_queue::JobStatus::Failed
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(attempt.load(Ordering::SeqCst), 1);

    service.stop_all(true).await;
}

/// Scenario 5: cancellation of a running job.
#[tokio::test]
async fn cancelling_a_running_job_records_cancelled_not_completed() {
    let definition = define_job("uploads", "upload:process")
        .handler(|ctx| async move {
            loop {
                if ctx.is_cancelled() {
                    return Ok::<_, anyhow::Error>(json!({"aborted": true}));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .build()
        .unwrap();
    let service = Arc::new(QueueService::builder().register(definition).build().unwrap());
    service.start_all();

    let job_id =
        service.add("uploads", "upload:process", json!({}), AddOptions::default()).await.unwrap();

    wait_until_job(&service, &job_id, Duration::from_secs(2), |status| {
        status == blaize_queue::JobStatus::Running
    })
    .await;

    let completed = Arc::new(Mutex::new(false));
    let cancelled_reason = Arc::new(Mutex::new(None));
    let (completed_clone, cancelled_clone) = (completed.clone(), cancelled_reason.clone());
    service.subscribe(
        job_id.clone(),
        Callbacks {
            on_completed: Some(Box::new(move |_| *completed_clone.lock().unwrap() = true)),
            on_cancelled: Some(Box::new(move |reason| {
                *cancelled_clone.lock().unwrap() = Some(reason.map(str::to_string))
            })),
            ..Default::default()
        },
    );

    service.cancel_job(&job_id, Some("user".into())).await.unwrap();

    wait_until_job(&service, &job_id, Duration::from_secs(2), |status| {
        status == blaize_queue::JobStatus::Cancelled
    })
    .await;

    assert!(!*completed.lock().unwrap());
    assert_eq!(cancelled_reason.lock().unwrap().clone().flatten().as_deref(), Some("user"));

    service.stop_all(true).await;
}

/// Cancelling an already-queued job must keep it from ever reaching
/// `running` (P8).
#[tokio::test]
async fn cancelling_a_queued_job_before_fetch_prevents_running() {
    let definition = define_job("uploads", "upload:process")
        .handler(|_ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, anyhow::Error>(json!({}))
        })
        .build()
        .unwrap();
    // No start_all(): nothing ever fetches, so the job stays queued until cancelled.
    let service = QueueService::builder().register(definition).build().unwrap();

    let job_id =
        service.add("uploads", "upload:process", json!({}), AddOptions::default()).await.unwrap();
    service.cancel_job(&job_id, None).await.unwrap();

    let job = service.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, blaize_queue::JobStatus::Cancelled);

    // Idempotent: a second cancel of an already-terminal job is a no-op, not an error.
    service.cancel_job(&job_id, None).await.unwrap();
}

/// Scenario 6: priority ordering with concurrency 1 — the higher-priority
/// job enqueued second is still fetched first.
#[tokio::test]
async fn higher_priority_job_is_fetched_before_lower_priority() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = order.clone();
    let definition = define_job("reports", "report:build")
        .handler(move |ctx| {
            let order = order_clone.clone();
            async move {
                order.lock().unwrap().push(ctx.job().id.clone());
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, anyhow::Error>(json!({}))
            }
        })
        .build()
        .unwrap();
    let config = QueuePluginConfig::new()
        .with_queue("reports", QueueConfig::new().with_concurrency(1));
    let service = QueueService::builder().config(config).register(definition).build().unwrap();

    let low = service
        .add(
            "reports",
            "report:build",
            json!({}),
            AddOptions { priority: Some(1), ..Default::default() },
        )
        .await
        .unwrap();
    let high = service
        .add(
            "reports",
            "report:build",
            json!({}),
            AddOptions { priority: Some(9), ..Default::default() },
        )
        .await
        .unwrap();

    service.start_all();

    wait_until(|| order.lock().unwrap().len() == 2, Duration::from_secs(2)).await;

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec![high, low]);

    service.stop_all(true).await;
}

/// Scenario 7: subscriber fan-out with partial unsubscribe.
#[tokio::test]
async fn subscribers_see_progress_sequence_and_unsubscribe_stops_delivery() {
    let definition = define_job("reports", "report:build")
        .handler(|ctx| async move {
            for pct in [25, 50, 75, 100] {
                ctx.progress(pct, None);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok::<_, anyhow::Error>(json!({"ok": true}))
        })
        .build()
        .unwrap();
    let service = Arc::new(QueueService::builder().register(definition).build().unwrap());

    let job_id =
        service.add("reports", "report:build", json!({}), AddOptions::default()).await.unwrap();

    let subscriber_a = Arc::new(Mutex::new(Vec::new()));
    let subscriber_b = Arc::new(Mutex::new(Vec::new()));
    let subscriber_c = Arc::new(Mutex::new(Vec::new()));
    let completed_c = Arc::new(Mutex::new(None));

    let (a_clone, b_clone, c_clone, completed_c_clone) =
        (subscriber_a.clone(), subscriber_b.clone(), subscriber_c.clone(), completed_c.clone());

    service.subscribe(
        job_id.clone(),
        Callbacks {
            on_progress: Some(Box::new(move |p| a_clone.lock().unwrap().push(p.percent))),
            ..Default::default()
        },
    );
    let unsubscribe_b = service.subscribe(
        job_id.clone(),
        Callbacks {
            on_progress: Some(Box::new(move |p| b_clone.lock().unwrap().push(p.percent))),
            ..Default::default()
        },
    );
    service.subscribe(
        job_id.clone(),
        Callbacks {
            on_progress: Some(Box::new(move |p| c_clone.lock().unwrap().push(p.percent))),
            on_completed: Some(Box::new(move |result| *completed_c_clone.lock().unwrap() = Some(result.clone()))),
            ..Default::default()
        },
    );

    service.start_all();

    wait_until(|| !subscriber_a.lock().unwrap().is_empty(), Duration::from_secs(2)).await;
    unsubscribe_b.unsubscribe();

    wait_until_job(&service, &job_id, Duration::from_secs(2), |status| {
        status == blaize_queue::JobStatus::Completed
    })
    .await;

    assert_eq!(*subscriber_a.lock().unwrap(), vec![25, 50, 75, 100]);
    assert_eq!(*subscriber_c.lock().unwrap(), vec![25, 50, 75, 100]);
    assert!(subscriber_b.lock().unwrap().len() <= 1);
    assert_eq!(completed_c.lock().unwrap().clone(), Some(json!({"ok": true})));

    service.stop_all(true).await;
}
