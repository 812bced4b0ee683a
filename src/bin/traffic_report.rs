// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 车流统计 (Traffic Report)
///
/// 读取监测程序写入的 SQLite 表:
/// - hourly: 按小时平均车辆数, 终端输出并导出CSV
/// - recent: 最近的记录
/// - levels: 各车流等级的记录数
/// - watch:  定时重新统计并导出
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use traffic_monitor::logging::init_logger;
use traffic_monitor::report::{export_hourly_csv, write_hourly, write_recent};
use traffic_monitor::storage::{HourClock, TrafficStore};
use traffic_monitor::MonitorConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "车流统计 - 读取车流日志并汇总", long_about = None)]
struct Args {
    /// 配置文件 (可选, 只读)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite 数据库文件
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// 调试日志
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 按小时平均车辆数, 并导出CSV
    Hourly {
        /// CSV 输出路径
        #[arg(long)]
        csv: Option<PathBuf>,
        /// 不导出CSV
        #[arg(long)]
        no_csv: bool,
        /// 按本地时间分组 (默认UTC)
        #[arg(long)]
        localtime: bool,
    },
    /// 最近的记录
    Recent {
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// 各车流等级的记录数
    Levels,
    /// 定时重新统计并导出CSV, Ctrl+C 退出
    Watch {
        /// 刷新间隔 (秒)
        #[arg(short, long)]
        interval: Option<u64>,
        /// CSV 输出路径
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn load_config(args: &Args) -> Result<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&json)?
        }
        None => MonitorConfig::default(),
    };
    if let Some(db) = &args.database {
        config.database = db.clone();
    }
    Ok(config)
}

async fn hourly(store: &TrafficStore, csv: Option<PathBuf>, clock: HourClock) -> Result<()> {
    let rows = store.hourly_averages(clock).await?;
    let mut out = std::io::stdout().lock();
    write_hourly(&mut out, &rows)?;

    if let Some(path) = csv {
        export_hourly_csv(&path, &rows)?;
        println!("\n✅ Exported hourly summary to {}", path.display());
    }
    Ok(())
}

async fn recent(store: &TrafficStore, limit: u32) -> Result<()> {
    let rows = store.recent(limit).await?;
    write_recent(&mut std::io::stdout().lock(), &rows)?;
    Ok(())
}

async fn levels(store: &TrafficStore) -> Result<()> {
    let total = store.count().await?;
    println!("🚦 Traffic Levels ({} logs):", total);
    for (level, n) in store.level_breakdown().await? {
        let share = if total > 0 {
            n as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        println!("{:<9} {:>6}  ({:.1}%)", level, n, share);
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct WatchStats {
    refreshed: u32,
    failed: u32,
}

/// 定时刷新, 单次失败只记录日志, 直到 `shutdown` 完成
async fn watch(
    store: &TrafficStore,
    interval: Duration,
    csv: PathBuf,
    shutdown: impl std::future::Future<Output = ()>,
) -> WatchStats {
    let mut stats = WatchStats::default();
    let mut ticker = tokio::time::interval(interval);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match hourly(store, Some(csv.clone()), HourClock::Utc).await {
                    Ok(()) => stats.refreshed += 1,
                    Err(e) => {
                        stats.failed += 1;
                        error!("❌ 统计失败: {:#}", e);
                    }
                }
                println!();
            }
            _ = &mut shutdown => {
                info!("👋 退出");
                return stats;
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose, false);
    let config = load_config(&args)?;

    if !config.database.exists() {
        anyhow::bail!("database {} not found", config.database.display());
    }
    let store = TrafficStore::connect(&config.database)
        .await
        .with_context(|| format!("failed to open {}", config.database.display()))?;

    let report = &config.report;
    match args.command {
        Some(Command::Hourly {
            csv,
            no_csv,
            localtime,
        }) => {
            let csv = if no_csv {
                None
            } else {
                Some(csv.unwrap_or_else(|| report.csv_path.clone()))
            };
            let clock = if localtime {
                HourClock::Local
            } else {
                HourClock::Utc
            };
            hourly(&store, csv, clock).await?;
        }
        Some(Command::Recent { limit }) => {
            recent(&store, limit.unwrap_or(report.recent_limit)).await?;
        }
        Some(Command::Levels) => levels(&store).await?,
        Some(Command::Watch { interval, csv }) => {
            let secs = interval.unwrap_or(report.watch_interval_secs).max(1);
            info!("🔁 每 {} 秒重新统计", secs);
            let stats = watch(
                &store,
                Duration::from_secs(secs),
                csv.unwrap_or_else(|| report.csv_path.clone()),
                async {
                    let _ = tokio::signal::ctrl_c().await;
                },
            )
            .await;
            info!("刷新 {} 次, 失败 {} 次", stats.refreshed, stats.failed);
        }
        // 默认: 小时统计 + CSV + 最近记录
        None => {
            hourly(&store, Some(report.csv_path.clone()), HourClock::Utc).await?;
            println!();
            recent(&store, report.recent_limit).await?;
        }
    }

    store.close().await;
    Ok(())
}
