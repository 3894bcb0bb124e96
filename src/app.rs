use std::sync::Arc;

use anyhow::{Context, Result};
use botfleet_api::create_app;
use botfleet_core::config::AppConfig;
use botfleet_dispatcher::FleetContext;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{info, warn};

/// 控制进程：编排上下文 + HTTP接口 + 周期对账
pub struct Application {
    config: AppConfig,
    context: Arc<FleetContext>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let metrics = if config.observability.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("安装Prometheus指标导出器失败")?;
            Some(handle)
        } else {
            None
        };

        let context = FleetContext::build(&config)
            .await
            .context("创建编排上下文失败")?;

        Ok(Self {
            config,
            context: Arc::new(context),
            metrics,
        })
    }

    pub fn context(&self) -> &Arc<FleetContext> {
        &self.context
    }

    /// 启动对账和自动启动，然后服务HTTP请求直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let started = self
            .context
            .startup(&self.config.workers)
            .await
            .context("启动阶段对账失败")?;
        info!("Autostarted {} workers", started.len());

        let reconcile_loop = self.context.spawn_reconcile_loop(shutdown_rx.resubscribe());

        if self.config.api.enabled {
            self.serve_api(shutdown_rx.resubscribe()).await?;
        } else {
            info!("API disabled, waiting for shutdown signal");
            let _ = shutdown_rx.recv().await;
        }

        if let Some(handle) = reconcile_loop {
            if let Err(e) = handle.await {
                warn!("Reconcile loop ended abnormally: {}", e);
            }
        }
        self.context.shutdown().await;
        Ok(())
    }

    async fn serve_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let api = &self.config.api;
        let app = create_app(
            self.context.clone(),
            api,
            self.metrics.clone(),
            &self.config.observability.metrics_endpoint,
        );

        let listener = TcpListener::bind(&api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", api.bind_address))?;
        info!("API server listening on http://{}", api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API server received shutdown signal");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API server stopped");
        Ok(())
    }
}
