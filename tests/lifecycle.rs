use async_trait::async_trait;
use ferrous_runtime::{
    BoxError, Container, ContextError, Context, Lifecycle, LifecycleError, LifecycleState, Phase,
    Resolver, Starter, Stopper,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// A component that records its hooks; failure and delay are configurable.
struct Component {
    name: &'static str,
    log: Log,
    fail_start: bool,
    fail_stop: bool,
    start_delay: Duration,
}

impl Component {
    fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_start: false,
            fail_stop: false,
            start_delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl Starter for Component {
    async fn on_start(&self, _ctx: &Context) -> Result<(), BoxError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        self.log.lock().push(format!("start {}", self.name));
        if self.fail_start {
            return Err(format!("{} failed to start", self.name).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Stopper for Component {
    async fn on_stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        self.log.lock().push(format!("stop {}", self.name));
        if self.fail_stop {
            return Err(format!("{} failed to stop", self.name).into());
        }
        Ok(())
    }
}

struct Db(Component);
struct Cache(Component);
struct Api(Component);

#[async_trait]
impl Starter for Db {
    async fn on_start(&self, ctx: &Context) -> Result<(), BoxError> {
        self.0.on_start(ctx).await
    }
}
#[async_trait]
impl Stopper for Db {
    async fn on_stop(&self, ctx: &Context) -> Result<(), BoxError> {
        self.0.on_stop(ctx).await
    }
}
#[async_trait]
impl Starter for Cache {
    async fn on_start(&self, ctx: &Context) -> Result<(), BoxError> {
        self.0.on_start(ctx).await
    }
}
#[async_trait]
impl Stopper for Cache {
    async fn on_stop(&self, ctx: &Context) -> Result<(), BoxError> {
        self.0.on_stop(ctx).await
    }
}
#[async_trait]
impl Starter for Api {
    async fn on_start(&self, ctx: &Context) -> Result<(), BoxError> {
        self.0.on_start(ctx).await
    }
}
#[async_trait]
impl Stopper for Api {
    async fn on_stop(&self, ctx: &Context) -> Result<(), BoxError> {
        self.0.on_stop(ctx).await
    }
}

#[derive(Clone, Copy, Default)]
struct Settings {
    fail_db_stop: bool,
    fail_cache_start: bool,
    fail_api_stop: bool,
    slow_cache: Option<Duration>,
}

/// Api depends on Cache, which depends on Db.
fn stack(log: &Log, settings: Settings) -> Lifecycle {
    let container = Container::new();

    let db_log = log.clone();
    container
        .register::<Db>()
        .lifecycle()
        .factory(move |_| {
            let mut c = Component::new("db", &db_log);
            c.fail_stop = settings.fail_db_stop;
            Db(c)
        })
        .unwrap();

    let cache_log = log.clone();
    container
        .register::<Cache>()
        .lifecycle()
        .provider(move |r| {
            r.get::<Db>()?;
            let mut c = Component::new("cache", &cache_log);
            c.fail_start = settings.fail_cache_start;
            if let Some(delay) = settings.slow_cache {
                c.start_delay = delay;
            }
            Ok(Cache(c))
        })
        .unwrap();

    let api_log = log.clone();
    container
        .register::<Api>()
        .lifecycle()
        .provider(move |r| {
            r.get::<Cache>()?;
            let mut c = Component::new("api", &api_log);
            c.fail_stop = settings.fail_api_stop;
            Ok(Api(c))
        })
        .unwrap();

    container.build().unwrap();
    container.get_required::<Api>();
    container.lifecycle()
}

#[tokio::test]
async fn test_start_in_dependency_order_and_stop_in_reverse() {
    let log: Log = Arc::default();
    let lifecycle = stack(&log, Settings::default());
    let ctx = Context::background();

    assert_eq!(lifecycle.len(), 3);
    lifecycle.start(&ctx).await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Started);
    lifecycle.stop(&ctx).await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);

    assert_eq!(
        *log.lock(),
        vec!["start db", "start cache", "start api", "stop api", "stop cache", "stop db"]
    );
}

#[tokio::test]
async fn test_start_failure_rolls_back_started_participants() {
    let log: Log = Arc::default();
    let lifecycle = stack(
        &log,
        Settings {
            fail_cache_start: true,
            ..Settings::default()
        },
    );

    let err = lifecycle.start(&Context::background()).await.unwrap_err();
    match &err {
        LifecycleError::StartFailed { participant, source } => {
            assert!(participant.ends_with("Cache"), "{participant}");
            assert_eq!(source.to_string(), "cache failed to start");
        }
        other => panic!("unexpected: {other}"),
    }
    // Api never started; only db is rolled back
    assert_eq!(*log.lock(), vec!["start db", "start cache", "stop db"]);
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stop_runs_every_stopper_and_aggregates_errors() {
    let log: Log = Arc::default();
    let lifecycle = stack(
        &log,
        Settings {
            fail_db_stop: true,
            fail_api_stop: true,
            ..Settings::default()
        },
    );
    let ctx = Context::background();
    lifecycle.start(&ctx).await.unwrap();

    let err = lifecycle.stop(&ctx).await.unwrap_err();
    match &err {
        LifecycleError::StopFailed(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors[0].participant.ends_with("Api"));
            assert!(errors[1].participant.ends_with("Db"));
            assert_eq!(errors[0].source.to_string(), "api failed to stop");
        }
        other => panic!("unexpected: {other}"),
    }
    assert_eq!(
        log.lock()[3..].to_vec(),
        vec!["stop api", "stop cache", "stop db"]
    );
    assert!(err.to_string().contains("2 participant(s) failed"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_reports_pending_and_rolls_back() {
    let log: Log = Arc::default();
    let lifecycle = stack(
        &log,
        Settings {
            slow_cache: Some(Duration::from_secs(10)),
            ..Settings::default()
        },
    );
    let ctx = Context::background().with_timeout(Duration::from_secs(1));

    let err = lifecycle.start(&ctx).await.unwrap_err();
    match &err {
        LifecycleError::Timeout {
            phase,
            reason,
            pending,
        } => {
            assert_eq!(*phase, Phase::Start);
            assert_eq!(*reason, ContextError::DeadlineExceeded);
            assert_eq!(pending.len(), 2);
            assert!(pending[0].ends_with("Cache"));
            assert!(pending[1].ends_with("Api"));
        }
        other => panic!("unexpected: {other}"),
    }
    // The expired start context did not prevent the rollback
    assert_eq!(*log.lock(), vec!["start db", "stop db"]);
}

#[tokio::test]
async fn test_stop_after_cancel_reports_unreached_participants() {
    let log: Log = Arc::default();
    let lifecycle = stack(&log, Settings::default());
    lifecycle.start(&Context::background()).await.unwrap();

    let ctx = Context::background();
    ctx.cancel();
    let err = lifecycle.stop(&ctx).await.unwrap_err();
    match err {
        LifecycleError::StopFailed(errors) => assert_eq!(errors.len(), 3),
        other => panic!("unexpected: {other}"),
    }
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert_eq!(log.lock().len(), 3);
}

#[tokio::test]
async fn test_transients_and_passive_singletons_do_not_start() {
    struct Plain;

    let log: Log = Arc::default();
    let container = Container::new();
    container.add_singleton(Plain).unwrap();
    let transient_log = log.clone();
    container
        .register::<Db>()
        .scope(ferrous_runtime::Lifetime::Transient)
        .lifecycle()
        .factory(move |_| Db(Component::new("transient", &transient_log)))
        .unwrap();
    container.build().unwrap();
    container.get_required::<Plain>();
    container.get_required::<Db>();

    let lifecycle = container.lifecycle();
    // The passive singleton is recorded but has no hooks
    assert_eq!(lifecycle.len(), 1);
    assert!(lifecycle.participants()[0].is_passive());

    let ctx = Context::background();
    lifecycle.start(&ctx).await.unwrap();
    lifecycle.stop(&ctx).await.unwrap();
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_prebuilt_instance_participates_without_resolution() {
    let log: Log = Arc::default();
    let container = Container::new();
    container
        .register::<Db>()
        .lifecycle()
        .instance(Db(Component::new("db", &log)))
        .unwrap();
    container
        .register::<Cache>()
        .starter()
        .instance(Cache(Component::new("cache", &log)))
        .unwrap();
    container.build().unwrap();

    // Nothing resolved either instance by hand
    let lifecycle = container.lifecycle();
    assert_eq!(lifecycle.len(), 2);
    assert!(lifecycle.participants()[0].name().ends_with("Db"));

    let ctx = Context::background();
    lifecycle.start(&ctx).await.unwrap();
    lifecycle.stop(&ctx).await.unwrap();
    // Cache only declared starter()
    assert_eq!(*log.lock(), vec!["start db", "start cache", "stop db"]);

    // A later resolution hands out the same value and records nothing new
    container.get_required::<Db>();
    assert_eq!(container.lifecycle().len(), 2);
}
