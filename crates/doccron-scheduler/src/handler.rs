//! Job handler callbacks.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::SchedulerError;
use crate::job::Job;

/// Callbacks invoked by the scheduler.
///
/// Only [`on_document`](JobHandler::on_document) is required. The scheduler
/// awaits every callback before moving on, and errors returned from any of
/// them are passed to [`on_error`](JobHandler::on_error) instead of stopping
/// the loop.
///
/// A panic inside a callback is caught and reported as
/// [`SchedulerError::Handler`], and the job's fate is applied as usual. This
/// only holds when panics unwind: the workspace release profile sets
/// `panic = "abort"`, where a panicking handler takes the process down and
/// its job is picked up again once the lock lapses.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a claimed job.
    async fn on_document(&self, job: &Job) -> Result<(), SchedulerError>;

    /// Called once when the scheduler starts.
    async fn on_start(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    /// Called once after the scheduler has stopped.
    async fn on_stop(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    /// Called when the queue runs dry, once per idle stretch.
    async fn on_idle(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    /// Called with every error the scheduler swallows.
    async fn on_error(&self, _error: &SchedulerError, _job: Option<&Job>) {}
}

/// Adapter turning a closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Build a handler from an async closure taking the claimed job.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SchedulerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SchedulerError>> + Send + 'static,
{
    async fn on_document(&self, job: &Job) -> Result<(), SchedulerError> {
        (self.f)(job.clone()).await
    }
}

/// Await a callback, turning a panic into a handler error.
pub(crate) async fn guarded<Fut>(callback: Fut) -> Result<(), SchedulerError>
where
    Fut: Future<Output = Result<(), SchedulerError>>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(SchedulerError::handler(format!(
            "callback panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use doccron_store::Document;
    use serde_json::json;

    use crate::config::FieldNames;

    fn job() -> Job {
        let paths = FieldNames::default().resolve().unwrap();
        let now = Utc::now();
        Job::from_claim(Document::new(json!({})).unwrap(), &paths, now, now)
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = handler_fn(move |_job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.on_document(&job()).await.unwrap();
        handler.on_document(&job()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let handler = handler_fn(|_job| async { Err(SchedulerError::handler("nope")) });

        assert!(handler.on_start().await.is_ok());
        assert!(handler.on_idle().await.is_ok());
        assert!(handler.on_stop().await.is_ok());
        handler.on_error(&SchedulerError::handler("x"), None).await;
        assert!(handler.on_document(&job()).await.is_err());
    }

    #[tokio::test]
    async fn test_guarded_turns_panic_into_error() {
        let handler = handler_fn(|job: Job| async move {
            if job.body().get("boom").is_some() {
                panic!("bad payload in {}", job.id());
            }
            Ok(())
        });

        assert!(guarded(handler.on_document(&job())).await.is_ok());

        let paths = FieldNames::default().resolve().unwrap();
        let now = Utc::now();
        let bad = Job::from_claim(Document::new(json!({"boom": true})).unwrap(), &paths, now, now);
        let err = guarded(handler.on_document(&bad)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Handler(_)));
        assert!(err.to_string().contains("bad payload"));
    }
}
