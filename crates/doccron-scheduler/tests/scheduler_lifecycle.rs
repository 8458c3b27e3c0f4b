//! End-to-end tests running the scheduler loop against real stores.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

use doccron_scheduler::{Job, JobHandler, Scheduler, SchedulerConfig, SchedulerError, SchedulerState};
use doccron_store::{DocumentId, DocumentStore, MemoryStore, SqliteStore};

// ============================================================================
// Test Helpers
// ============================================================================

/// Records every callback.
#[derive(Default)]
struct Recorder {
    handled: Mutex<Vec<DocumentId>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    idles: AtomicUsize,
}

#[async_trait]
impl JobHandler for Recorder {
    async fn on_document(&self, job: &Job) -> Result<(), SchedulerError> {
        self.handled.lock().push(job.id().clone());
        Ok(())
    }

    async fn on_start(&self) -> Result<(), SchedulerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SchedulerError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_idle(&self) -> Result<(), SchedulerError> {
        self.idles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks inside `on_document` until released.
struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl JobHandler for Gate {
    async fn on_document(&self, _job: &Job) -> Result<(), SchedulerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Panics on documents carrying `boom`, records everything else.
#[derive(Default)]
struct Fragile {
    handled: Mutex<Vec<DocumentId>>,
    errors: Mutex<Vec<(String, Option<DocumentId>)>>,
}

#[async_trait]
impl JobHandler for Fragile {
    async fn on_document(&self, job: &Job) -> Result<(), SchedulerError> {
        if job.body().get("boom").is_some() {
            panic!("cannot handle {}", job.id());
        }
        self.handled.lock().push(job.id().clone());
        Ok(())
    }

    async fn on_error(&self, error: &SchedulerError, job: Option<&Job>) {
        self.errors
            .lock()
            .push((error.to_string(), job.map(|j| j.id().clone())));
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig::default().with_idle_delay(Duration::from_millis(5))
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let handler = Arc::new(Recorder::default());
    let scheduler = Scheduler::new(Arc::new(MemoryStore::new()), handler.clone(), fast_config()).unwrap();

    scheduler.start().await;
    scheduler.start().await;
    assert!(scheduler.is_running());
    assert_eq!(handler.starts.load(Ordering::SeqCst), 1);

    wait_until("idle", || scheduler.is_idle()).await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    scheduler.stop().await;
    scheduler.stop().await;
    assert!(!scheduler.is_running());
    assert!(!scheduler.is_idle());
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(handler.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_without_start_is_noop() {
    let handler = Arc::new(Recorder::default());
    let scheduler = Scheduler::new(Arc::new(MemoryStore::new()), handler.clone(), fast_config()).unwrap();

    scheduler.stop().await;
    assert_eq!(handler.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let handler = Arc::new(Recorder::default());
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(store.clone(), handler.clone(), fast_config()).unwrap();

    scheduler.start().await;
    scheduler.stop().await;

    store.insert_one(json!({"sleepUntil": null})).await.unwrap();
    scheduler.start().await;
    wait_until("job handled", || handler.handled.lock().len() == 1).await;
    scheduler.stop().await;

    assert_eq!(handler.starts.load(Ordering::SeqCst), 2);
    assert_eq!(handler.stops.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Processing
// ============================================================================

#[tokio::test]
async fn test_loop_drains_due_jobs() {
    let handler = Arc::new(Recorder::default());
    let store = Arc::new(MemoryStore::new());
    for n in 0..3 {
        store
            .insert_one(json!({"sleepUntil": null, "n": n}))
            .await
            .unwrap();
    }

    let scheduler = Scheduler::new(store.clone(), handler.clone(), fast_config()).unwrap();
    scheduler.start().await;
    wait_until("all jobs handled", || handler.handled.lock().len() == 3).await;
    wait_until("idle", || scheduler.is_idle()).await;
    scheduler.stop().await;

    for document in store.all().await {
        assert!(document.body.get("sleepUntil").is_none());
    }
    assert_eq!(handler.idles.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.metrics().completed, 3);
}

#[tokio::test]
async fn test_idle_callback_fires_once_per_episode() {
    let handler = Arc::new(Recorder::default());
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(store.clone(), handler.clone(), fast_config()).unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler.idles.load(Ordering::SeqCst), 1);

    store.insert_one(json!({"sleepUntil": null})).await.unwrap();
    wait_until("job handled", || handler.handled.lock().len() == 1).await;
    wait_until("second idle episode", || handler.idles.load(Ordering::SeqCst) == 2).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.idles.load(Ordering::SeqCst), 2);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_job() {
    let gate = Arc::new(Gate {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let store = Arc::new(MemoryStore::new());
    let id = store.insert_one(json!({"sleepUntil": null})).await.unwrap();

    let scheduler = Arc::new(Scheduler::new(store.clone(), gate.clone(), fast_config()).unwrap());
    scheduler.start().await;
    gate.entered.notified().await;
    assert!(scheduler.is_processing());
    assert_eq!(scheduler.state(), SchedulerState::Processing);

    let stopping = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.stop().await })
    };

    wait_until("stopping", || scheduler.state() == SchedulerState::Stopping).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopping.is_finished());
    assert!(scheduler.is_running());

    // Fate not yet recorded: still locked.
    let locked = store.find_by_id(&id).await.unwrap();
    assert!(locked.body["sleepUntil"].is_string());

    gate.release.notify_one();
    stopping.await.unwrap();

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(!scheduler.is_processing());
    let settled = store.find_by_id(&id).await.unwrap();
    assert!(settled.body.get("sleepUntil").is_none());
}

#[tokio::test]
async fn test_panicking_handler_does_not_stall_loop() {
    let handler = Arc::new(Fragile::default());
    let store = Arc::new(MemoryStore::new());
    let bad = store
        .insert_one(json!({"sleepUntil": null, "boom": true}))
        .await
        .unwrap();
    let good = store.insert_one(json!({"sleepUntil": null})).await.unwrap();

    let scheduler = Scheduler::new(store.clone(), handler.clone(), fast_config()).unwrap();
    scheduler.start().await;
    wait_until("good job handled", || handler.handled.lock().len() == 1).await;
    wait_until("idle", || scheduler.is_idle()).await;

    assert!(scheduler.is_running());
    assert!(!scheduler.is_processing());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert_eq!(handler.handled.lock().clone(), vec![good]);

    let errors = handler.errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].0.contains("panicked"));
    assert_eq!(errors[0].1.as_ref(), Some(&bad));

    let retired = store.find_by_id(&bad).await.unwrap();
    assert!(retired.body.get("sleepUntil").is_none());

    scheduler.stop().await;
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_idle_delay_spaces_polls() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig::default().with_idle_delay(Duration::from_secs(10));
    let scheduler = Scheduler::new(store, Arc::new(Recorder::default()), config).unwrap();

    scheduler.start().await;
    // Polls at 0s, 10s, 20s and 30s of paused time.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(scheduler.metrics().polls, 4);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

// ============================================================================
// Concurrency
// ============================================================================

/// Run one scheduler per store handle and check every job ran exactly once.
async fn assert_exclusive(stores: Vec<Arc<dyn DocumentStore>>, jobs: usize) {
    let handler = Arc::new(Recorder::default());
    let schedulers: Vec<Scheduler> = stores
        .into_iter()
        .map(|store| Scheduler::new(store, handler.clone(), fast_config()).unwrap())
        .collect();

    for scheduler in &schedulers {
        scheduler.start().await;
    }
    wait_until("all jobs handled", || handler.handled.lock().len() >= jobs).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    for scheduler in &schedulers {
        scheduler.stop().await;
    }

    let handled = handler.handled.lock().clone();
    let unique: HashSet<_> = handled.iter().cloned().collect();
    assert_eq!(handled.len(), jobs, "a job was handled twice");
    assert_eq!(unique.len(), jobs);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_schedulers_share_memory_store() {
    let store = Arc::new(MemoryStore::new());
    for n in 0..40 {
        store
            .insert_one(json!({"sleepUntil": null, "n": n}))
            .await
            .unwrap();
    }

    let stores: Vec<Arc<dyn DocumentStore>> = (0..4).map(|_| store.clone() as Arc<dyn DocumentStore>).collect();
    assert_exclusive(stores, 40).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_schedulers_share_sqlite_file() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("jobs.db");

    let seed = SqliteStore::open(&db).await.unwrap();
    for n in 0..20 {
        seed.insert_one(json!({"sleepUntil": null, "n": n}))
            .await
            .unwrap();
    }

    let mut stores: Vec<Arc<dyn DocumentStore>> = Vec::new();
    for _ in 0..4 {
        stores.push(Arc::new(SqliteStore::open(&db).await.unwrap()));
    }
    assert_exclusive(stores, 20).await;
}
