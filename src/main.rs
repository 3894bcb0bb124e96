use std::time::Duration;

use anyhow::{Context, Result};
use botfleet::app::Application;
use botfleet::shutdown::{wait_for_signal, ShutdownManager};
use botfleet::unit::{open_store, UnitProcess};
use botfleet_core::config::AppConfig;
use botfleet_core::models::UnitSpec;
use clap::{Arg, ArgMatches, Command};
use tracing::{error, info, warn};

fn log_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别（覆盖配置文件）")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式（覆盖配置文件）")
                .value_parser(["json", "pretty"]),
        )
}

fn cli() -> Command {
    Command::new("botfleet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("多Bot Worker编排系统")
        .subcommand_required(true)
        .subcommand(log_args(
            Command::new("serve").about("运行控制进程").arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("配置文件路径"),
            ),
        ))
        .subcommand(log_args(
            Command::new("unit").about("运行单个Worker运行单元（参数来自 BOTFLEET_* 环境变量）"),
        ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("serve", args)) => serve(args).await,
        Some(("unit", args)) => unit(args).await,
        _ => anyhow::bail!("缺少子命令"),
    }
}

fn init_logging(args: &ArgMatches, level: &str, format: &str) -> Result<()> {
    let level = args.get_one::<String>("log-level").map_or(level, String::as_str);
    let format = args.get_one::<String>("log-format").map_or(format, String::as_str);
    botfleet_core::init_logging(level, format).context("初始化日志系统失败")
}

async fn serve(args: &ArgMatches) -> Result<()> {
    let config_path = args.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;
    init_logging(
        args,
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    info!("Starting botfleet control process");

    let app = std::sync::Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let app_handle = {
        let app = app.clone();
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    wait_for_signal().await;
    info!("Shutting down");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(Ok(()))) => info!("Control process exited cleanly"),
        Ok(Ok(Err(e))) => error!("Control process failed: {:#}", e),
        Ok(Err(e)) => error!("Control process task panicked: {}", e),
        Err(_) => warn!("Shutdown timed out, exiting anyway"),
    }
    Ok(())
}

async fn unit(args: &ArgMatches) -> Result<()> {
    init_logging(args, "info", "json")?;
    let spec = UnitSpec::from_env().context("读取运行单元环境变量失败")?;
    let store = open_store(&spec.status_url).await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut unit = tokio::spawn(UnitProcess::new(spec, store).run(shutdown_rx));

    tokio::select! {
        // 运行单元自行退出（启动失败等）
        result = &mut unit => return result.context("运行单元任务异常结束")?,
        _ = wait_for_signal() => {}
    }
    shutdown_manager.shutdown().await;
    unit.await.context("运行单元任务异常结束")?
}
