use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use botfleet_core::config::{DispatcherConfig, ProvisionerConfig, RuntimeBackendKind};
use botfleet_core::models::{
    DispatchOutcome, EventOutcome, EventStatus, RuntimeInfo, StatsMap, StatusRecord, UnitSpec, WorkerConfig,
    WorkerRecord, WorkerStatus, WorkerType,
};
use botfleet_core::{FleetError, FleetResult, StatusStore, WorkerRecordRepository, WorkerRuntime};
use botfleet_dispatcher::{ControlAction, FleetContext};
use botfleet_infrastructure::provisioner::{
    builtin_factory, InProcessBackend, UnitBackend, WorkerFactory,
};
use botfleet_worker::WorkerHost;
use botfleet_infrastructure::{
    InMemoryStatusStore, InMemoryWorkerRecordRepository, RuntimeProvisioner,
};
use serde_json::{json, Value};

fn provisioner_config() -> ProvisionerConfig {
    ProvisionerConfig {
        backend: RuntimeBackendKind::InProcess,
        status_timeout_seconds: 5,
        status_poll_interval_ms: 10,
        ..Default::default()
    }
}

fn context_with(factory: WorkerFactory) -> (Arc<FleetContext>, Arc<InMemoryStatusStore>) {
    let store = Arc::new(InMemoryStatusStore::new());
    let backend = Arc::new(InProcessBackend::with_factory(store.clone(), factory));
    context_on(backend, store)
}

fn context_on(
    backend: Arc<dyn UnitBackend>,
    store: Arc<InMemoryStatusStore>,
) -> (Arc<FleetContext>, Arc<InMemoryStatusStore>) {
    let provisioner = Arc::new(RuntimeProvisioner::new(
        provisioner_config(),
        "",
        backend,
        store.clone(),
    ));
    let context = FleetContext::new(
        Arc::new(InMemoryWorkerRecordRepository::new()),
        store.clone(),
        provisioner,
        DispatcherConfig {
            stats_refresh_enabled: false,
            ..Default::default()
        },
    )
    .unwrap();
    (Arc::new(context), store)
}

fn context() -> (Arc<FleetContext>, Arc<InMemoryStatusStore>) {
    context_with(builtin_factory())
}

async fn dispatch(context: &Arc<FleetContext>, identity: &str, event: Value) -> DispatchOutcome {
    let dispatcher = context.dispatcher.clone();
    let identity = identity.to_string();
    tokio::task::spawn_blocking(move || dispatcher.dispatch(&identity, event))
        .await
        .unwrap()
}

async fn units_named(context: &FleetContext, name: &str) -> usize {
    context
        .provisioner
        .list()
        .await
        .unwrap()
        .iter()
        .filter(|unit| unit.name == name)
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn start_dispatch_stop_then_port_is_reused() {
    let (context, _store) = context();
    let controller = &context.controller;

    let report = controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    assert_eq!(report.status, WorkerStatus::Running);
    assert_eq!(report.port, Some(8443));

    let status = controller.status("tok-A").await.unwrap();
    assert_eq!(status.status, WorkerStatus::Running);
    assert_eq!(status.unit_name.as_deref(), Some("bot_tok-A"));
    assert!(status.webhook_url.unwrap().ends_with("/workers/webhook/tok-A"));

    match dispatch(&context, "tok-A", json!({"text": "hi"})).await {
        DispatchOutcome::Delivered(outcome) => {
            assert_eq!(outcome.status, EventStatus::Handled);
            assert_eq!(outcome.replies, vec!["hi".to_string()]);
        }
        other => panic!("Expected delivery, got {other:?}"),
    }

    let report = controller.stop("tok-A").await.unwrap();
    assert_eq!(report.status, WorkerStatus::Stopped);
    assert_eq!(controller.status("tok-A").await.unwrap().status, WorkerStatus::Stopped);

    let report = controller
        .start("tok-B", WorkerType::Numbers, WorkerConfig::new())
        .await
        .unwrap();
    assert_eq!(report.port, Some(8443));
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_idempotent() {
    let (context, _store) = context();
    let controller = &context.controller;

    controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    let again = controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();

    assert_eq!(again.action, ControlAction::AlreadyRunning);
    assert_eq!(again.status, WorkerStatus::Running);
    assert_eq!(units_named(&context, "bot_tok-A").await, 1);
    assert_eq!(context.provisioner.list().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_on_stopped_worker_is_noop() {
    let (context, store) = context();
    let controller = &context.controller;

    controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    controller.stop("tok-A").await.unwrap();

    let record_before = context.records.get("tok-A").await.unwrap().unwrap();
    let status_before = store.get_status("tok-A").await.unwrap();

    let report = controller.stop("tok-A").await.unwrap();
    assert_eq!(report.action, ControlAction::AlreadyStopped);

    let record_after = context.records.get("tok-A").await.unwrap().unwrap();
    assert_eq!(record_after.last_activity, record_before.last_activity);
    assert_eq!(store.get_status("tok-A").await.unwrap(), status_before);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_matches_stop_then_start() {
    let (context, _store) = context();
    let controller = &context.controller;

    controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    let restarted = controller.restart("tok-A").await.unwrap();
    assert_eq!(restarted.action, ControlAction::Restarted);
    assert_eq!(restarted.status, WorkerStatus::Running);
    assert_eq!(restarted.port, Some(8443));
    assert_eq!(units_named(&context, "bot_tok-A").await, 1);

    let (reference, _) = self::context();
    reference
        .controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    reference.controller.stop("tok-A").await.unwrap();
    let expected = reference
        .controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();

    assert_eq!(restarted.status, expected.status);
    assert_eq!(restarted.unit_name, expected.unit_name);
    assert_eq!(restarted.port, expected.port);
    assert_eq!(restarted.webhook_url, expected.webhook_url);

    assert!(matches!(
        dispatch(&context, "tok-A", json!({"text": "still here"})).await,
        DispatchOutcome::Delivered(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_get_distinct_ports() {
    let (context, _store) = context();
    let n = 12;

    let tasks: Vec<_> = (0..n)
        .map(|i| {
            let context = context.clone();
            tokio::spawn(async move {
                context
                    .controller
                    .start(&format!("token-{i:04}"), WorkerType::Echo, WorkerConfig::new())
                    .await
            })
        })
        .collect();

    let mut ports = HashSet::new();
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        ports.insert(report.port.unwrap());
    }
    assert_eq!(ports.len(), n);
    assert_eq!(context.registry.len(), n);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_of_same_identity_create_one_unit() {
    let (context, _store) = context();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let context = context.clone();
            tokio::spawn(async move {
                context
                    .controller
                    .start("123456:tok-A-secret", WorkerType::Echo, WorkerConfig::new())
                    .await
            })
        })
        .collect();

    let mut started = 0;
    for task in tasks {
        let report = task.await.unwrap().unwrap();
        if report.action == ControlAction::Started {
            started += 1;
        } else {
            assert_eq!(report.action, ControlAction::AlreadyRunning);
        }
    }
    assert_eq!(started, 1);
    assert_eq!(units_named(&context, "bot_A-secret").await, 1);
    assert_eq!(context.provisioner.list().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatch_without_handle_is_unavailable_and_read_only() {
    let (context, store) = context();
    context
        .controller
        .start("tok-A", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    context.registry.remove("tok-A");

    let before = store.get_status("tok-A").await.unwrap();
    let outcome = dispatch(&context, "tok-A", json!({"text": "hi"})).await;
    assert!(matches!(outcome, DispatchOutcome::WorkerUnavailable { .. }));
    assert_eq!(store.get_status("tok-A").await.unwrap(), before);

    context.controller.stop("tok-A").await.unwrap();
    let outcome = dispatch(&context, "tok-A", json!({"text": "hi"})).await;
    assert!(matches!(outcome, DispatchOutcome::WorkerUnavailable { .. }));
}

/// 对 `{"crash": true}` 返回内部错误的Worker
struct FragileWorker {
    running: bool,
}

#[async_trait(?Send)]
impl WorkerRuntime for FragileWorker {
    fn name(&self) -> &str {
        "FragileWorker"
    }

    fn initialize(&mut self, _config: &WorkerConfig) -> FleetResult<()> {
        Ok(())
    }

    async fn start(&mut self) -> FleetResult<()> {
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> FleetResult<()> {
        self.running = false;
        Ok(())
    }

    async fn handle_event(&mut self, event: &Value) -> FleetResult<EventOutcome> {
        if event.get("crash").is_some() {
            return Err(FleetError::Processing("downstream API exploded".to_string()));
        }
        if event.get("panic").is_some() {
            panic!("worker bug");
        }
        Ok(EventOutcome::reply("ok"))
    }

    async fn stats(&self) -> FleetResult<StatsMap> {
        let mut stats = StatsMap::new();
        stats.insert("running".to_string(), json!(self.running));
        Ok(stats)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn processing_failure_is_isolated() {
    let factory: WorkerFactory = Arc::new(|spec: &UnitSpec| -> Box<dyn WorkerRuntime> {
        match spec.identity.as_str() {
            "fragile" => Box::new(FragileWorker { running: false }),
            _ => botfleet_worker::instantiate(spec.worker_type),
        }
    });
    let (context, _store) = context_with(factory);
    let controller = &context.controller;
    controller
        .start("fragile", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();
    controller
        .start("healthy", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();

    let outcome = dispatch(&context, "fragile", json!({"crash": true})).await;
    assert!(matches!(outcome, DispatchOutcome::ProcessingError { message } if message.contains("exploded")));

    let outcome = dispatch(&context, "fragile", json!({"panic": true})).await;
    assert!(matches!(outcome, DispatchOutcome::ProcessingError { .. }));

    assert!(matches!(
        dispatch(&context, "fragile", json!({"text": "again"})).await,
        DispatchOutcome::Delivered(_)
    ));
    assert!(matches!(
        dispatch(&context, "healthy", json!({"text": "hi"})).await,
        DispatchOutcome::Delivered(_)
    ));
    assert_eq!(
        controller.status("fragile").await.unwrap().status,
        WorkerStatus::Running
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_with_failing_start_records_error() {
    let (context, store) = context();
    let controller = &context.controller;

    controller
        .start("tok-A", WorkerType::Numbers, WorkerConfig::new())
        .await
        .unwrap();

    // 让 start 失败：配置非法
    let mut record = context.records.get("tok-A").await.unwrap().unwrap();
    record
        .config
        .insert("random_max".to_string(), json!("a lot"));
    context.records.upsert(&record).await.unwrap();

    let err = controller.restart("tok-A").await.unwrap_err();
    assert!(!matches!(err, FleetError::RestartFailed { .. }));

    let status = store.get_status("tok-A").await.unwrap().unwrap();
    assert_eq!(status.status, WorkerStatus::Error);
    assert!(status.error.contains("random_max"));
    assert!(context.registry.get("tok-A").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_all_picks_up_out_of_band_changes() {
    let (context, store) = context();
    let controller = &context.controller;
    for identity in ["tok-A", "tok-B"] {
        controller
            .start(identity, WorkerType::Echo, WorkerConfig::new())
            .await
            .unwrap();
    }

    store
        .put_status(
            "tok-B",
            &StatusRecord::new(WorkerStatus::Stopped),
        )
        .await
        .unwrap();

    let reports = controller.reconcile_all().await.unwrap();
    assert_eq!(reports.len(), 2);
    let b = context.records.get("tok-B").await.unwrap().unwrap();
    assert_eq!(b.status, WorkerStatus::Stopped);
    assert!(context.registry.get("tok-B").is_none());
    assert!(context.registry.get("tok-A").is_some());

    let outcome = dispatch(&context, "tok-B", json!({"text": "hi"})).await;
    assert!(matches!(outcome, DispatchOutcome::WorkerUnavailable { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_keeps_never_started_worker_stopped() {
    let (context, store) = context();
    let controller = &context.controller;
    context
        .records
        .upsert(&WorkerRecord::new("tok-N", WorkerType::Echo, WorkerConfig::new()))
        .await
        .unwrap();

    let report = controller.reconcile("tok-N").await.unwrap();
    assert_eq!(report.action, ControlAction::Reconciled);
    assert_eq!(report.status, WorkerStatus::Stopped);

    controller.reconcile_all().await.unwrap();
    let cached = context.records.get("tok-N").await.unwrap().unwrap();
    assert_eq!(cached.status, WorkerStatus::Stopped);

    let report = controller.stop("tok-N").await.unwrap();
    assert_eq!(report.action, ControlAction::AlreadyStopped);
    assert!(store.get_status("tok-N").await.unwrap().is_none());
}

/// 进程内后端，`stuck` 打开时 stop/remove 都失败，模拟无法销毁的容器
struct StuckBackend {
    inner: InProcessBackend,
    stuck: AtomicBool,
}

impl StuckBackend {
    fn refuse(&self) -> FleetResult<()> {
        if self.stuck.load(Ordering::SeqCst) {
            Err(FleetError::Provisioning("daemon refused to remove unit".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UnitBackend for StuckBackend {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn inspect(&self, name: &str) -> FleetResult<Option<RuntimeInfo>> {
        self.inner.inspect(name).await
    }

    async fn launch(&self, spec: &UnitSpec) -> FleetResult<()> {
        self.inner.launch(spec).await
    }

    async fn stop(&self, name: &str) -> FleetResult<()> {
        self.refuse()?;
        self.inner.stop(name).await
    }

    async fn remove(&self, name: &str) -> FleetResult<()> {
        self.refuse()?;
        self.inner.remove(name).await
    }

    async fn list(&self, prefix: &str) -> FleetResult<Vec<RuntimeInfo>> {
        self.inner.list(prefix).await
    }

    fn attach(&self, name: &str) -> Option<Arc<WorkerHost>> {
        self.inner.attach(name)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_does_not_reuse_unit_that_survived_stop() {
    let store = Arc::new(InMemoryStatusStore::new());
    let backend = Arc::new(StuckBackend {
        inner: InProcessBackend::new(store.clone()),
        stuck: AtomicBool::new(false),
    });
    let (context, store) = context_on(backend.clone(), store);
    let controller = &context.controller;

    controller
        .start("tok-R", WorkerType::Echo, WorkerConfig::new())
        .await
        .unwrap();

    backend.stuck.store(true, Ordering::SeqCst);
    let err = controller.restart("tok-R").await.unwrap_err();
    assert!(err.to_string().contains("daemon refused"));

    let status = store.get_status("tok-R").await.unwrap().unwrap();
    assert_eq!(status.status, WorkerStatus::Error);
    assert!(status.error.contains("daemon refused"));
    assert!(context.registry.get("tok-R").is_none());
    assert_eq!(units_named(&context, "bot_tok-R").await, 1);

    backend.stuck.store(false, Ordering::SeqCst);
    let report = controller.restart("tok-R").await.unwrap();
    assert_eq!(report.action, ControlAction::Restarted);
    assert_eq!(report.status, WorkerStatus::Running);
    assert_eq!(report.error, None);
    assert_eq!(units_named(&context, "bot_tok-R").await, 1);
}
