// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 记录线程: 接收 TrafficSample → 写入 SQLite
//!
//! 检测线程是同步的, 这里自带一个单线程 tokio 运行时驱动 sqlx

use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use tracing::{error, info};

use crate::error::Result;
use crate::storage::TrafficStore;
use crate::traffic::TrafficSample;

/// 在当前线程消费采样直到发送端全部关闭, 返回写入条数
pub fn record_samples(store_path: PathBuf, samples: Receiver<TrafficSample>) -> Result<u64> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let store = TrafficStore::connect(&store_path).await?;
        info!("💾 数据库已就绪: {}", store_path.display());

        let mut written = 0u64;
        // 阻塞接收: 运行时上没有其他任务
        while let Ok(sample) = samples.recv() {
            match store.record(&sample).await {
                Ok(_) => written += 1,
                // 单次写入失败不影响检测
                Err(e) => error!("❌ 写入数据库失败: {}", e),
            }
        }

        store.close().await;
        info!("💾 记录线程退出, 共写入 {} 条", written);
        Ok(written)
    })
}

/// 启动记录线程
pub fn spawn_recorder(
    store_path: PathBuf,
    samples: Receiver<TrafficSample>,
) -> std::io::Result<JoinHandle<Result<u64>>> {
    std::thread::Builder::new()
        .name("recorder".into())
        .spawn(move || record_samples(store_path, samples))
}
