use async_trait::async_trait;
use ferrous_runtime::{
    BackoffConfig, BoxError, Context, Supervisor, Worker, WorkerError, WorkerEvent, WorkerManager,
    WorkerObserver, WorkerOptions, WorkerState,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails its first `failures` starts, then succeeds.
struct Scripted {
    name: &'static str,
    failures: u32,
    panic_first: bool,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl Scripted {
    fn new(name: &'static str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            failures,
            panic_first: false,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }

    fn always_failing(name: &'static str) -> Arc<Self> {
        Self::new(name, u32::MAX)
    }

    fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_start(&self, _ctx: &Context) -> Result<(), BoxError> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_first && attempt == 1 {
            panic!("kaboom");
        }
        if attempt <= self.failures {
            return Err(format!("attempt {attempt} failed").into());
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(String, WorkerEvent)>>,
}

impl Recorder {
    fn events_for(&self, worker: &str) -> Vec<WorkerEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(name, _)| name == worker)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl WorkerObserver for Recorder {
    fn on_event(&self, worker: &str, event: &WorkerEvent) {
        self.events.lock().push((worker.to_string(), event.clone()));
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_interval: Duration::from_millis(100),
        multiplier: 2.0,
        max_interval: Duration::from_secs(10),
        randomization_factor: 0.0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_then_resets_after_success() {
    let worker = Scripted::new("flaky", 3);
    let recorder = Arc::new(Recorder::default());
    let manager = WorkerManager::new();
    manager.add_observer(recorder.clone());
    manager
        .register(worker.clone(), WorkerOptions::new().backoff(fast_backoff()).max_restarts(10))
        .unwrap();

    manager.start_all(&Context::background()).unwrap();
    eventually(|| {
        recorder
            .events_for("flaky")
            .iter()
            .any(|e| matches!(e, WorkerEvent::BackoffReset { .. }))
    })
    .await;

    let events = recorder.events_for("flaky");
    let delays: Vec<Duration> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::BackoffScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
    );
    assert!(events.contains(&WorkerEvent::Started { attempt: 4 }));
    assert_eq!(
        events.last(),
        Some(&WorkerEvent::BackoffReset { previous_failures: 3 })
    );
    assert_eq!(manager.supervisor("flaky").unwrap().state(), WorkerState::Running);
    assert_eq!(worker.starts(), 4);

    manager.stop_all(&Context::background()).await;
    assert_eq!(worker.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_trips_after_exactly_max_restarts() {
    let worker = Scripted::always_failing("doomed");
    let supervisor = Supervisor::spawn(
        worker.clone(),
        WorkerOptions::new().backoff(fast_backoff()).max_restarts(3),
        &Context::background(),
    );

    assert_eq!(supervisor.wait_terminal().await, WorkerState::CircuitTripped);
    assert_eq!(worker.starts(), 3);
    match supervisor.outcome() {
        Some(WorkerError::CircuitTripped {
            worker,
            failures,
            last_error,
        }) => {
            assert_eq!(worker, "doomed");
            assert_eq!(failures, 3);
            assert_eq!(last_error, "attempt 3 failed");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // No further attempts, however long we wait
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(worker.starts(), 3);

    // Stop still runs on_stop once and keeps the tripped state visible
    supervisor.stop(&Context::background()).await.unwrap();
    assert_eq!(worker.stops(), 1);
    assert_eq!(supervisor.state(), WorkerState::CircuitTripped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_wait_returns_promptly() {
    let worker = Scripted::always_failing("sleepy");
    let supervisor = Supervisor::spawn(
        worker.clone(),
        WorkerOptions::new()
            .backoff(BackoffConfig::constant(Duration::from_secs(3600)))
            .unlimited_restarts(),
        &Context::background(),
    );
    supervisor.wait_for(WorkerState::BackoffWait).await;

    let started = tokio::time::Instant::now();
    supervisor.stop(&Context::background()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(supervisor.state(), WorkerState::Stopped);
    assert_eq!(worker.starts(), 1);
    assert_eq!(worker.stops(), 1);

    // Idempotent
    supervisor.stop(&Context::background()).await.unwrap();
    assert_eq!(worker.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_start_is_treated_as_failure() {
    let worker = Arc::new(Scripted {
        name: "panicky",
        failures: 0,
        panic_first: true,
        starts: AtomicU32::new(0),
        stops: AtomicU32::new(0),
    });
    let recorder = Arc::new(Recorder::default());
    let manager = WorkerManager::new();
    manager.add_observer(recorder.clone());
    manager
        .register(worker.clone(), WorkerOptions::new().backoff(fast_backoff()))
        .unwrap();
    manager.start_all(&Context::background()).unwrap();

    manager.supervisor("panicky").unwrap().wait_for(WorkerState::Running).await;
    assert_eq!(worker.starts(), 2);

    let failure = recorder
        .events_for("panicky")
        .into_iter()
        .find_map(|e| match e {
            WorkerEvent::Failed { error, .. } => Some(error),
            _ => None,
        })
        .unwrap();
    assert!(failure.contains("panicked"), "{failure}");
    assert!(failure.contains("kaboom"), "{failure}");

    manager.stop_all(&Context::background()).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_critical_failure_wins() {
    let manager = WorkerManager::new();
    let options = WorkerOptions::new().critical().backoff(fast_backoff()).max_restarts(1);
    manager.register(Scripted::always_failing("alpha"), options).unwrap();
    manager.register(Scripted::always_failing("beta"), options).unwrap();

    manager.start_all(&Context::background()).unwrap();
    let fatal = manager.wait_fatal().await.unwrap();

    let first_worker = match &fatal {
        WorkerError::CriticalFailed { worker, source } => {
            assert!(matches!(**source, WorkerError::CircuitTripped { failures: 1, .. }));
            worker.clone()
        }
        other => panic!("unexpected: {other}"),
    };
    assert!(first_worker == "alpha" || first_worker == "beta");

    // Let the second trip land; it must not replace the first
    tokio::time::sleep(Duration::from_secs(1)).await;
    for record in manager.records() {
        assert_eq!(record.state(), WorkerState::CircuitTripped);
    }
    assert_eq!(manager.fatal(), Some(fatal));

    manager.stop_all(&Context::background()).await;
}

#[tokio::test(start_paused = true)]
async fn test_non_critical_trip_is_not_fatal() {
    let manager = WorkerManager::new();
    manager
        .register(
            Scripted::always_failing("optional"),
            WorkerOptions::new().backoff(fast_backoff()).max_restarts(2),
        )
        .unwrap();
    manager.start_all(&Context::background()).unwrap();

    let supervisor = manager.supervisor("optional").unwrap();
    assert_eq!(supervisor.wait_terminal().await, WorkerState::CircuitTripped);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(manager.fatal().is_none());
    assert!(!manager.fatal_token().is_cancelled());
    manager.stop_all(&Context::background()).await;
}

#[tokio::test]
async fn test_registration_rules() {
    let manager = WorkerManager::new();
    manager.register(Scripted::new("one", 0), WorkerOptions::new()).unwrap();

    assert_eq!(
        manager.register(Scripted::new("one", 0), WorkerOptions::new()),
        Err(WorkerError::DuplicateWorker("one".to_string()))
    );

    manager.start_all(&Context::background()).unwrap();
    assert!(matches!(
        manager.register(Scripted::new("two", 0), WorkerOptions::new()),
        Err(WorkerError::ManagerRunning(_))
    ));
    assert!(matches!(
        manager.start_all(&Context::background()),
        Err(WorkerError::ManagerRunning(_))
    ));

    manager.stop_all(&Context::background()).await;
    assert_eq!(manager.states(), vec![("one".to_string(), WorkerState::Stopped)]);
}

#[tokio::test(start_paused = true)]
async fn test_critical_trip_during_shutdown_is_absorbed() {
    let manager = WorkerManager::new();
    manager
        .register(
            Scripted::always_failing("late"),
            WorkerOptions::new()
                .critical()
                .backoff(BackoffConfig::constant(Duration::from_secs(3600)))
                .max_restarts(100),
        )
        .unwrap();
    manager.start_all(&Context::background()).unwrap();
    manager.supervisor("late").unwrap().wait_for(WorkerState::BackoffWait).await;

    manager.stop_all(&Context::background()).await;
    assert!(manager.fatal().is_none());
    assert_eq!(manager.states(), vec![("late".to_string(), WorkerState::Stopped)]);
}

/// `on_start` takes `delay`; counts starts and completed starts.
struct SlowStart {
    delay: Duration,
    starts: AtomicU32,
    finished: AtomicU32,
    stops: AtomicU32,
}

#[async_trait]
impl Worker for SlowStart {
    fn name(&self) -> &str {
        "slow"
    }

    async fn on_start(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_deadline_during_start_keeps_worker_stopped() {
    let worker = Arc::new(SlowStart {
        delay: Duration::from_secs(2),
        starts: AtomicU32::new(0),
        finished: AtomicU32::new(0),
        stops: AtomicU32::new(0),
    });
    let supervisor = Supervisor::spawn(worker.clone(), WorkerOptions::new(), &Context::background());
    eventually(|| worker.starts.load(Ordering::SeqCst) == 1).await;

    let ctx = Context::background().with_timeout(Duration::from_millis(100));
    supervisor.stop(&ctx).await.unwrap();
    assert_eq!(supervisor.state(), WorkerState::Stopped);
    assert_eq!(worker.stops.load(Ordering::SeqCst), 1);

    // The in-flight start was aborted and the loop never comes back
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(supervisor.state(), WorkerState::Stopped);
    assert_eq!(worker.finished.load(Ordering::SeqCst), 0);
    assert_eq!(worker.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_start_then_stays_stopped() {
    let worker = Arc::new(SlowStart {
        delay: Duration::from_secs(2),
        starts: AtomicU32::new(0),
        finished: AtomicU32::new(0),
        stops: AtomicU32::new(0),
    });
    let supervisor = Supervisor::spawn(worker.clone(), WorkerOptions::new(), &Context::background());
    eventually(|| worker.starts.load(Ordering::SeqCst) == 1).await;

    supervisor.stop(&Context::background()).await.unwrap();
    assert_eq!(worker.finished.load(Ordering::SeqCst), 1);
    assert_eq!(supervisor.state(), WorkerState::Stopped);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(supervisor.state(), WorkerState::Stopped);
}

/// Starts fine, then its background loop reports a failure `fail_after`
/// later, for the first `crashing_runs` runs.
struct Crashing {
    name: &'static str,
    fail_after: Duration,
    crashing_runs: u32,
    starts: AtomicU32,
    runs: Mutex<Vec<Context>>,
}

impl Crashing {
    fn new(name: &'static str, fail_after: Duration, crashing_runs: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_after,
            crashing_runs,
            starts: AtomicU32::new(0),
            runs: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for Crashing {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_start(&self, ctx: &Context) -> Result<(), BoxError> {
        let run = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        self.runs.lock().push(ctx.clone());
        if run <= self.crashing_runs {
            let ctx = ctx.clone();
            let fail_after = self.fail_after;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(fail_after) => {
                        ctx.report_failure("connection lost");
                    }
                    _ = ctx.done() => {}
                }
            });
        }
        Ok(())
    }

    async fn on_stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_running_worker_failure_restarts_it() {
    let worker = Crashing::new("feed", Duration::from_secs(1), 1);
    let recorder = Arc::new(Recorder::default());
    let manager = WorkerManager::new();
    manager.add_observer(recorder.clone());
    manager
        .register(worker.clone(), WorkerOptions::new().backoff(fast_backoff()).max_restarts(3))
        .unwrap();
    manager.start_all(&Context::background()).unwrap();

    eventually(|| worker.starts() == 2).await;
    let supervisor = manager.supervisor("feed").unwrap();
    supervisor.wait_for(WorkerState::Running).await;

    let events = recorder.events_for("feed");
    assert!(events.contains(&WorkerEvent::Started { attempt: 1 }));
    assert!(events.contains(&WorkerEvent::Failed {
        attempt: 1,
        failures: 1,
        error: "connection lost".to_string(),
    }));
    assert!(events.contains(&WorkerEvent::BackoffScheduled {
        attempt: 1,
        delay: Duration::from_millis(100),
    }));
    assert!(events.contains(&WorkerEvent::Started { attempt: 2 }));

    // The failed run was cancelled; the new one is live
    let runs = worker.runs.lock().clone();
    assert!(runs[0].is_done());
    assert!(!runs[1].is_done());

    manager.stop_all(&Context::background()).await;
    assert!(runs[1].is_done());
    assert_eq!(supervisor.state(), WorkerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_crash_looping_worker_trips_the_circuit() {
    let worker = Crashing::new("flapping", Duration::from_millis(10), u32::MAX);
    let supervisor = Supervisor::spawn(
        worker.clone(),
        WorkerOptions::new().backoff(fast_backoff()).max_restarts(3),
        &Context::background(),
    );

    assert_eq!(supervisor.wait_terminal().await, WorkerState::CircuitTripped);
    assert_eq!(worker.starts(), 3);
    match supervisor.outcome() {
        Some(WorkerError::CircuitTripped {
            failures,
            last_error,
            ..
        }) => {
            assert_eq!(failures, 3);
            assert_eq!(last_error, "connection lost");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    supervisor.stop(&Context::background()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failures_after_stable_runs_do_not_accumulate() {
    let worker = Crashing::new("steady", Duration::from_secs(5), u32::MAX);
    let recorder = Arc::new(Recorder::default());
    let manager = WorkerManager::new();
    manager.add_observer(recorder.clone());
    manager
        .register(
            worker.clone(),
            WorkerOptions::new()
                .backoff(fast_backoff())
                .max_restarts(2)
                .stable_after(Duration::from_secs(1)),
        )
        .unwrap();
    manager.start_all(&Context::background()).unwrap();

    eventually(|| worker.starts() >= 4).await;
    let failures: Vec<u32> = recorder
        .events_for("steady")
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::Failed { failures, .. } => Some(*failures),
            _ => None,
        })
        .collect();
    assert!(failures.len() >= 3);
    assert!(failures.iter().all(|f| *f == 1), "{failures:?}");
    assert_ne!(manager.supervisor("steady").unwrap().state(), WorkerState::CircuitTripped);

    manager.stop_all(&Context::background()).await;
}
