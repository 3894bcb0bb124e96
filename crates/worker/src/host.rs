//! # Worker宿主线程
//!
//! 每个Worker拥有一个专属OS线程，线程内运行单线程tokio调度器。
//! 外部通过任务通道提交操作，结果经 oneshot 返回：
//!
//! ```text
//! 调用方（任意线程）                 Worker专属线程
//! ─────────────────                 ────────────────────────────
//! call / *_blocking ──job──▶ mpsc ──▶ current_thread runtime
//!        ▲                                  │  job(&mut worker).await
//!        └────────── oneshot ◀──────────────┘
//! ```
//!
//! 同一Worker的操作严格按提交顺序逐个执行；不同Worker互不阻塞。
//! 操作中的panic被捕获并转换为 [`FleetError::Processing`]，不会结束宿主线程。
//! 丢弃最后一个 [`WorkerHost`] 引用即关闭通道，线程在处理完已提交的操作后退出。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use botfleet_core::models::{EventOutcome, StatsMap, WorkerConfig};
use botfleet_core::{FleetError, FleetResult, WorkerRuntime};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// 宿主线程上Worker实例的可变引用
pub type WorkerRef<'a> = &'a mut (dyn WorkerRuntime + 'static);

type Job = Box<dyn for<'a> FnOnce(WorkerRef<'a>) -> LocalBoxFuture<'a, ()> + Send>;

fn job<F>(f: F) -> Job
where
    F: for<'a> FnOnce(WorkerRef<'a>) -> LocalBoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

pub struct WorkerHost {
    label: String,
    jobs: mpsc::UnboundedSender<Job>,
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("label", &self.label)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl WorkerHost {
    /// 启动宿主线程，并在该线程上通过 `factory` 构造Worker实例
    pub fn spawn<F>(label: impl Into<String>, factory: F) -> FleetResult<Arc<Self>>
    where
        F: FnOnce() -> Box<dyn WorkerRuntime> + Send + 'static,
    {
        let label = label.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FleetError::Internal(format!("创建Worker调度器失败: {e}")))?;

        let thread_label = label.clone();
        std::thread::Builder::new()
            .name(format!("worker-{label}"))
            .spawn(move || {
                let mut worker = factory();
                debug!("Worker host {} started for '{}'", thread_label, worker.name());
                runtime.block_on(async {
                    while let Some(job) = rx.recv().await {
                        job(worker.as_mut()).await;
                    }
                });
                debug!("Worker host {} exited", thread_label);
            })
            .map_err(|e| FleetError::Internal(format!("创建Worker线程失败: {e}")))?;

        Ok(Arc::new(Self { label, jobs: tx }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_alive(&self) -> bool {
        !self.jobs.is_closed()
    }

    fn submit<T, F>(&self, op: F) -> FleetResult<oneshot::Receiver<FleetResult<T>>>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(WorkerRef<'a>) -> LocalBoxFuture<'a, FleetResult<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let label = self.label.clone();

        let work = job(move |worker| {
            async move {
                let result = AssertUnwindSafe(op(worker))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        let message = panic_message(panic.as_ref());
                        error!("Worker {} panicked: {}", label, message);
                        Err(FleetError::Processing(format!("Worker panic: {message}")))
                    });
                // 调用方可能已放弃等待
                let _ = reply_tx.send(result);
            }
            .boxed_local()
        });

        self.jobs
            .send(work)
            .map_err(|_| FleetError::Internal(format!("Worker宿主线程已退出: {}", self.label)))?;
        Ok(reply_rx)
    }

    fn lost(&self) -> FleetError {
        FleetError::Internal(format!("Worker宿主线程未返回结果: {}", self.label))
    }

    /// 在Worker线程上执行任意操作并等待结果
    pub async fn call<T, F>(&self, op: F) -> FleetResult<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(WorkerRef<'a>) -> LocalBoxFuture<'a, FleetResult<T>> + Send + 'static,
    {
        let reply = self.submit(op)?;
        reply.await.map_err(|_| self.lost())?
    }

    /// `call` 的阻塞版本
    ///
    /// 不能在异步运行时的工作线程上调用。
    pub fn call_blocking<T, F>(&self, op: F) -> FleetResult<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(WorkerRef<'a>) -> LocalBoxFuture<'a, FleetResult<T>> + Send + 'static,
    {
        let reply = self.submit(op)?;
        reply.blocking_recv().map_err(|_| self.lost())?
    }

    pub async fn initialize(&self, config: WorkerConfig) -> FleetResult<()> {
        self.call(move |worker| async move { worker.initialize(&config) }.boxed_local())
            .await
    }

    pub async fn start(&self) -> FleetResult<()> {
        self.call(|worker| worker.start()).await
    }

    pub async fn stop(&self) -> FleetResult<()> {
        self.call(|worker| worker.stop()).await
    }

    pub async fn handle_event(&self, event: serde_json::Value) -> FleetResult<EventOutcome> {
        self.call(move |worker| async move { worker.handle_event(&event).await }.boxed_local())
            .await
    }

    pub fn handle_event_blocking(&self, event: serde_json::Value) -> FleetResult<EventOutcome> {
        self.call_blocking(move |worker| {
            async move { worker.handle_event(&event).await }.boxed_local()
        })
    }

    pub async fn stats(&self) -> FleetResult<StatsMap> {
        self.call(|worker| worker.stats()).await
    }

    pub async fn name(&self) -> FleetResult<String> {
        self.call(|worker| {
            let name = worker.name().to_string();
            async move { Ok(name) }.boxed_local()
        })
        .await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
