//! [`JobContext`]: what a handler actually receives.

use crate::logging::Logger;
use crate::model::{Job, Progress};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reports a progress update. Boxed because the worker builds this per job
/// from a closure over the subscription bus, the event bus and the job id.
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// Passed by value to every handler invocation. Carries the job's input
/// `data`, a cancellation signal tied to `stopAll(graceful: false)` and any
/// explicit per-job cancel, a `progress` callback, a logger pre-scoped with
/// `job_id`/`queue`/`job_type`, and a read-only snapshot of the job record
/// as it stood when the attempt started.
#[derive(Clone)]
pub struct JobContext {
    pub data: Value,
    job: Job,
    cancellation: CancellationToken,
    progress_sink: ProgressSink,
    logger: Arc<dyn Logger>,
}

impl JobContext {
    pub fn new(
        job: Job,
        cancellation: CancellationToken,
        progress_sink: ProgressSink,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self { data: job.data.clone(), job, cancellation, progress_sink, logger }
    }

    /// A read-only snapshot of the job as it stood when this attempt began.
    /// Does not reflect progress reported during the current attempt.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Reports progress. Percent is clamped into `[0, 100]`; delivery to
    /// subscribers and the external event bus is best-effort and never
    /// returns an error to the handler.
    pub fn progress(&self, percent: i64, message: Option<String>) {
        (self.progress_sink)(Progress::new(percent, message));
    }

    /// True once the job has been asked to stop, either via an explicit
    /// `cancelJob` or an immediate `stopAll`. Long-running handlers should
    /// poll this (or race against [`JobContext::cancelled`]) at safe
    /// checkpoints; the worker does not forcibly abort handler futures.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the job is asked to stop. Intended for use in a
    /// `tokio::select!` alongside the handler's own work.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::TracingLogger;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn sample_job() -> Job {
        Job::new(
            "job-1".into(),
            "emails".into(),
            "email:send".into(),
            json!({"to": "a@example.com"}),
            5,
            3,
            30_000,
            HashMap::new(),
        )
    }

    #[test]
    fn progress_invokes_sink_with_clamped_value() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        let sink: ProgressSink = Arc::new(move |p| *received_clone.lock().unwrap() = Some(p));
        let ctx = JobContext::new(
            sample_job(),
            CancellationToken::new(),
            sink,
            Arc::new(TracingLogger::new()),
        );

        ctx.progress(500, Some("almost done".into()));
        let progress = received.lock().unwrap().clone().unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.message.as_deref(), Some("almost done"));
    }

    #[tokio::test]
    async fn cancellation_token_propagates() {
        let token = CancellationToken::new();
        let sink: ProgressSink = Arc::new(|_| {});
        let ctx = JobContext::new(sample_job(), token.clone(), sink, Arc::new(TracingLogger::new()));

        assert!(!ctx.is_cancelled());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                ctx.cancelled().await;
                fired_clone.store(true, Ordering::SeqCst);
            })
        };
        token.cancel();
        waiter.await.unwrap();
        assert!(ctx.is_cancelled());
        assert!(fired.load(Ordering::SeqCst));
    }
}
