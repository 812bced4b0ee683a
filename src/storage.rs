// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! SQLite 车流日志
//!
//! 表结构固定, 只追加不修改:
//! ```sql
//! CREATE TABLE traffic_data (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
//!     car_count INTEGER NOT NULL,
//!     traffic_level TEXT NOT NULL
//! )
//! ```

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;
use crate::traffic::{TrafficLevel, TrafficSample};

/// 与 SQLite CURRENT_TIMESTAMP 相同的格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 一行车流日志
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TrafficRecord {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub car_count: i64,
    pub traffic_level: String,
}

impl TrafficRecord {
    pub fn level(&self) -> Option<TrafficLevel> {
        self.traffic_level.parse().ok()
    }
}

/// 某小时的平均车辆数
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct HourlyAverage {
    pub hour: String,
    pub average: f64,
}

/// 统计使用的时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HourClock {
    #[default]
    Utc,
    Local,
}

#[derive(Clone)]
pub struct TrafficStore {
    pool: SqlitePool,
}

impl TrafficStore {
    /// 打开(必要时创建)数据库文件并建表
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_table_if_not_exists().await?;
        Ok(store)
    }

    /// 内存数据库 (单连接, 测试用)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            // 连接关闭即丢失数据
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_table_if_not_exists().await?;
        Ok(store)
    }

    pub async fn create_table_if_not_exists(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traffic_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                car_count INTEGER NOT NULL,
                traffic_level TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 写入一次采样, 返回行ID
    pub async fn record(&self, sample: &TrafficSample) -> Result<i64> {
        let timestamp = sample.captured_at.format(TIMESTAMP_FORMAT).to_string();
        let id = sqlx::query(
            "INSERT INTO traffic_data (timestamp, car_count, traffic_level) VALUES (?, ?, ?)",
        )
        .bind(timestamp)
        .bind(sample.car_count as i64)
        .bind(sample.level.as_str())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(
            "[SQLite] Logged: {} cars ({})",
            sample.car_count, sample.level
        );
        Ok(id)
    }

    /// 最近的记录, 新的在前
    pub async fn recent(&self, limit: u32) -> Result<Vec<TrafficRecord>> {
        let rows = sqlx::query_as::<_, TrafficRecord>(
            "SELECT id, timestamp, car_count, traffic_level FROM traffic_data \
             ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// 按一天中的小时分组的平均车辆数
    pub async fn hourly_averages(&self, clock: HourClock) -> Result<Vec<HourlyAverage>> {
        let sql = match clock {
            HourClock::Utc => {
                "SELECT strftime('%H', timestamp) AS hour, AVG(car_count) AS average \
                 FROM traffic_data WHERE strftime('%H', timestamp) IS NOT NULL \
                 GROUP BY hour ORDER BY hour"
            }
            HourClock::Local => {
                "SELECT strftime('%H', timestamp, 'localtime') AS hour, AVG(car_count) AS average \
                 FROM traffic_data WHERE strftime('%H', timestamp) IS NOT NULL \
                 GROUP BY hour ORDER BY hour"
            }
        };
        let rows = sqlx::query_as::<_, HourlyAverage>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// 各车流等级的记录数
    pub async fn level_breakdown(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT traffic_level, COUNT(*) FROM traffic_data \
             GROUP BY traffic_level ORDER BY COUNT(*) DESC, traffic_level",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM traffic_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::TrafficThresholds;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn record_and_read_back() {
        let store = TrafficStore::in_memory().await.unwrap();
        let t = TrafficThresholds::default();

        let id = store.record(&TrafficSample::at(12, &t, at(8, 15))).await.unwrap();
        assert_eq!(id, 1);

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].car_count, 12);
        assert_eq!(rows[0].traffic_level, "Heavy");
        assert_eq!(rows[0].level(), Some(TrafficLevel::Heavy));
        assert_eq!(rows[0].timestamp, at(8, 15));
    }

    #[tokio::test]
    async fn default_timestamp_is_filled_by_sqlite() {
        let store = TrafficStore::in_memory().await.unwrap();
        sqlx::query("INSERT INTO traffic_data (car_count, traffic_level) VALUES (3, 'Light')")
            .execute(&store.pool)
            .await
            .unwrap();

        let rows = store.recent(1).await.unwrap();
        assert_eq!(rows[0].car_count, 3);
        assert_eq!(store.hourly_averages(HourClock::Utc).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn table_creation_is_idempotent() {
        let store = TrafficStore::in_memory().await.unwrap();
        store.create_table_if_not_exists().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
