// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 车流等级: 车辆数 → Light / Moderate / Heavy

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 车流等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrafficLevel {
    Light,
    Moderate,
    Heavy,
}

impl TrafficLevel {
    /// 使用默认阈值 (≥10 Heavy, ≥5 Moderate)
    pub fn from_count(count: u32) -> Self {
        TrafficThresholds::default().classify(count)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficLevel::Light => "Light",
            TrafficLevel::Moderate => "Moderate",
            TrafficLevel::Heavy => "Heavy",
        }
    }
}

impl fmt::Display for TrafficLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrafficLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(TrafficLevel::Light),
            "moderate" => Ok(TrafficLevel::Moderate),
            "heavy" => Ok(TrafficLevel::Heavy),
            other => Err(format!("unknown traffic level `{}`", other)),
        }
    }
}

/// 车流等级阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficThresholds {
    pub moderate: u32,
    pub heavy: u32,
}

impl Default for TrafficThresholds {
    fn default() -> Self {
        Self {
            moderate: 5,
            heavy: 10,
        }
    }
}

impl TrafficThresholds {
    pub fn classify(&self, count: u32) -> TrafficLevel {
        if count >= self.heavy {
            TrafficLevel::Heavy
        } else if count >= self.moderate {
            TrafficLevel::Moderate
        } else {
            TrafficLevel::Light
        }
    }

    pub fn is_valid(&self) -> bool {
        self.moderate <= self.heavy
    }
}

/// 一次车流采样 (检测线程 → 记录线程)
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSample {
    pub car_count: u32,
    pub level: TrafficLevel,
    /// UTC
    pub captured_at: NaiveDateTime,
}

impl TrafficSample {
    pub fn new(car_count: u32, thresholds: &TrafficThresholds) -> Self {
        Self::at(car_count, thresholds, chrono::Utc::now().naive_utc())
    }

    pub fn at(car_count: u32, thresholds: &TrafficThresholds, captured_at: NaiveDateTime) -> Self {
        Self {
            car_count,
            level: thresholds.classify(car_count),
            captured_at,
        }
    }
}

/// 定时记录: 距上次触发严格超过 interval 才触发
#[derive(Debug, Clone)]
pub struct LogTicker {
    interval: Duration,
    last: Instant,
}

impl LogTicker {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) > self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_boundaries() {
        for count in 0..5 {
            assert_eq!(TrafficLevel::from_count(count), TrafficLevel::Light);
        }
        for count in 5..10 {
            assert_eq!(TrafficLevel::from_count(count), TrafficLevel::Moderate);
        }
        assert_eq!(TrafficLevel::from_count(10), TrafficLevel::Heavy);
        assert_eq!(TrafficLevel::from_count(250), TrafficLevel::Heavy);
    }

    #[test]
    fn custom_thresholds() {
        let t = TrafficThresholds {
            moderate: 2,
            heavy: 3,
        };
        assert_eq!(t.classify(1), TrafficLevel::Light);
        assert_eq!(t.classify(2), TrafficLevel::Moderate);
        assert_eq!(t.classify(3), TrafficLevel::Heavy);
        assert!(t.is_valid());
        assert!(!TrafficThresholds {
            moderate: 8,
            heavy: 4
        }
        .is_valid());
    }

    #[test]
    fn level_text_round_trip() {
        assert_eq!(TrafficLevel::Moderate.to_string(), "Moderate");
        assert_eq!("heavy".parse::<TrafficLevel>(), Ok(TrafficLevel::Heavy));
        assert_eq!(" Light ".parse::<TrafficLevel>(), Ok(TrafficLevel::Light));
        assert!("gridlock".parse::<TrafficLevel>().is_err());
    }

    #[test]
    fn sample_classifies_count() {
        let sample = TrafficSample::new(7, &TrafficThresholds::default());
        assert_eq!(sample.level, TrafficLevel::Moderate);
        assert_eq!(sample.car_count, 7);
    }

    #[test]
    fn ticker_fires_strictly_after_interval() {
        let start = Instant::now();
        let mut ticker = LogTicker::starting_at(Duration::from_secs(10), start);

        assert!(!ticker.due(start));
        assert!(!ticker.due(start + Duration::from_secs(10)));
        assert!(ticker.due(start + Duration::from_millis(10_001)));
        // 触发后重新计时
        assert!(!ticker.due(start + Duration::from_secs(15)));
        assert!(ticker.due(start + Duration::from_secs(21)));
    }
}
