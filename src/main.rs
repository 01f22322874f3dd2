use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use taskflow_config::AppConfig;
use taskflow_domain::entities::NewTask;
use taskflow_engine::{ShutdownManager, SimulatedExecutor, TaskService};
use taskflow_infrastructure::{init_logging_from_config, SqliteTaskStore};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;

    // 命令行参数优先于配置文件
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    init_logging_from_config(&config.observability)?;

    match matches.subcommand() {
        Some(("run", sub)) => run(config, sub).await,
        Some(("submit", sub)) => submit(config, sub).await,
        _ => Err(anyhow::anyhow!("未知的子命令")),
    }
}

fn cli() -> Command {
    Command::new("taskflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("进程内异步任务执行引擎")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(
            Command::new("run").about("启动worker池并处理任务").arg(
                Arg::new("workers")
                    .short('w')
                    .long("workers")
                    .value_name("N")
                    .help("worker数量，覆盖 engine.worker_count")
                    .value_parser(value_parser!(usize)),
            ),
        )
        .subcommand(
            Command::new("submit")
                .about("提交一个任务到存储")
                .arg(
                    Arg::new("title")
                        .short('t')
                        .long("title")
                        .value_name("TITLE")
                        .help("任务标题")
                        .required(true),
                )
                .arg(
                    Arg::new("payload")
                        .short('p')
                        .long("payload")
                        .value_name("JSON")
                        .help("任务载荷（JSON）"),
                )
                .arg(
                    Arg::new("max-retries")
                        .long("max-retries")
                        .value_name("N")
                        .help("最大重试次数")
                        .value_parser(value_parser!(i32)),
                )
                .arg(
                    Arg::new("delay-seconds")
                        .long("delay-seconds")
                        .value_name("SECONDS")
                        .help("最早执行时间相对当前的延后秒数")
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    Arg::new("timeout-seconds")
                        .long("timeout-seconds")
                        .value_name("SECONDS")
                        .help("单次执行时限，不超过引擎配置的时限")
                        .value_parser(value_parser!(u32)),
                ),
        )
}

async fn run(config: AppConfig, matches: &ArgMatches) -> Result<()> {
    let worker_count = matches
        .get_one::<usize>("workers")
        .copied()
        .unwrap_or(config.engine.worker_count);

    info!("启动任务执行引擎");
    info!("数据库: {}", config.database.url);

    let store = Arc::new(
        SqliteTaskStore::connect(&config.database)
            .await
            .with_context(|| format!("打开任务存储失败: {}", config.database.url))?,
    );
    let service = TaskService::builder(
        store.clone(),
        store.clone(),
        Arc::new(SimulatedExecutor::new()),
    )
    .with_config(config.engine.clone())
    .build();

    if config.engine.reconcile_on_startup {
        let recovered = service.reconcile().await.context("启动对账失败")?;
        info!("对账完成，接管 {} 个未完成任务", recovered);
    }

    service
        .start(worker_count)
        .await
        .context("启动worker池失败")?;

    let shutdown_manager = ShutdownManager::new();
    let signal_handle = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            shutdown_manager.shutdown().await;
        })
    };

    shutdown_manager.wait_for_shutdown().await;
    info!("收到关闭信号，开始优雅关闭...");
    signal_handle.abort();

    if service.shutdown(config.engine.shutdown_grace()).await {
        info!("引擎已优雅关闭");
    } else {
        warn!("引擎关闭超时，执行中的任务已被中止");
    }

    store.close().await;
    info!("任务执行引擎已退出");
    Ok(())
}

async fn submit(config: AppConfig, matches: &ArgMatches) -> Result<()> {
    let title = matches
        .get_one::<String>("title")
        .context("缺少任务标题")?;

    let mut request = NewTask::new(title.as_str());
    if let Some(payload) = matches.get_one::<String>("payload") {
        serde_json::from_str::<serde_json::Value>(payload).context("载荷不是合法的JSON")?;
        request.payload = Some(payload.clone());
    }
    request.max_retries = matches.get_one::<i32>("max-retries").copied();
    if let Some(seconds) = matches.get_one::<i64>("delay-seconds") {
        request.scheduled_at = Some(chrono::Utc::now() + chrono::Duration::seconds(*seconds));
    }
    request.execution_timeout_seconds = matches.get_one::<u32>("timeout-seconds").copied();

    let store = Arc::new(
        SqliteTaskStore::connect(&config.database)
            .await
            .with_context(|| format!("打开任务存储失败: {}", config.database.url))?,
    );
    // 只持久化，不启动worker；由开启对账的 run 进程接管
    let service = TaskService::builder(
        store.clone(),
        store.clone(),
        Arc::new(SimulatedExecutor::new()),
    )
    .with_config(config.engine.clone())
    .build();

    let task = service.submit(request).await.context("提交任务失败")?;
    info!(task_id = %task.id, "任务已提交");
    if !config.engine.reconcile_on_startup {
        warn!("engine.reconcile_on_startup 未开启，run 进程不会自动接管该任务");
    }
    println!("{}", task.id);

    service.shutdown(Duration::from_secs(1)).await;
    store.close().await;
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
