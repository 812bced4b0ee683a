// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 离线统计: 按小时平均车辆数, 终端输出 + CSV导出

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::storage::{HourlyAverage, TrafficRecord};

pub const CSV_HEADER: [&str; 2] = ["Hour", "Average Car Count"];

/// 平均值文本: 整数也保留一位小数 (5 → "5.0")
pub fn format_average(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// "08:00 - 3.5 cars"
pub fn format_hourly_line(row: &HourlyAverage) -> String {
    let rounded = (row.average * 100.0).round() / 100.0;
    format!("{}:00 - {} cars", row.hour, format_average(rounded))
}

pub fn format_record_line(row: &TrafficRecord) -> String {
    format!(
        "({}, '{}', {}, '{}')",
        row.id,
        row.timestamp.format(crate::storage::TIMESTAMP_FORMAT),
        row.car_count,
        row.traffic_level
    )
}

pub fn write_hourly<W: Write>(out: &mut W, rows: &[HourlyAverage]) -> std::io::Result<()> {
    writeln!(out, "📊 Average Cars by Hour:")?;
    for row in rows {
        writeln!(out, "{}", format_hourly_line(row))?;
    }
    Ok(())
}

pub fn write_recent<W: Write>(out: &mut W, rows: &[TrafficRecord]) -> std::io::Result<()> {
    writeln!(out, "🧾 Last {} Traffic Logs:", rows.len())?;
    for row in rows {
        writeln!(out, "{}", format_record_line(row))?;
    }
    Ok(())
}

/// CSV: 每小时一行, 平均值不取整
pub fn write_hourly_csv<W: Write>(writer: W, rows: &[HourlyAverage]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    for row in rows {
        let average = format_average(row.average);
        wtr.write_record([row.hour.as_str(), average.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_hourly_csv(path: impl AsRef<Path>, rows: &[HourlyAverage]) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_hourly_csv(file, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<HourlyAverage> {
        vec![
            HourlyAverage {
                hour: "08".into(),
                average: 3.5,
            },
            HourlyAverage {
                hour: "17".into(),
                average: 20.0 / 3.0,
            },
        ]
    }

    #[test]
    fn hourly_lines_are_rounded() {
        let r = rows();
        assert_eq!(format_hourly_line(&r[0]), "08:00 - 3.5 cars");
        assert_eq!(format_hourly_line(&r[1]), "17:00 - 6.67 cars");
    }

    #[test]
    fn whole_averages_keep_one_decimal() {
        let row = HourlyAverage {
            hour: "05".into(),
            average: 5.0,
        };
        assert_eq!(format_hourly_line(&row), "05:00 - 5.0 cars");
        assert_eq!(format_average(0.0), "0.0");
        assert_eq!(format_average(12.25), "12.25");

        let mut out = Vec::new();
        write_hourly_csv(&mut out, &[row]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Hour,Average Car Count\n05,5.0\n"
        );
    }

    #[test]
    fn rounding_to_whole_number_keeps_decimal() {
        let row = HourlyAverage {
            hour: "09".into(),
            average: 6.999,
        };
        assert_eq!(format_hourly_line(&row), "09:00 - 7.0 cars");
    }

    #[test]
    fn recent_lines_are_row_tuples() {
        let ts = chrono::NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(8, 30, 5)
            .unwrap();
        let rows = vec![
            TrafficRecord {
                id: 7,
                timestamp: ts,
                car_count: 12,
                traffic_level: "Heavy".into(),
            },
            TrafficRecord {
                id: 6,
                timestamp: ts,
                car_count: 0,
                traffic_level: "Light".into(),
            },
        ];
        assert_eq!(
            format_record_line(&rows[0]),
            "(7, '2026-10-18 08:30:05', 12, 'Heavy')"
        );

        let mut out = Vec::new();
        write_recent(&mut out, &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "🧾 Last 2 Traffic Logs:");
        assert_eq!(lines[2], "(6, '2026-10-18 08:30:05', 0, 'Light')");
    }

    #[test]
    fn terminal_output_has_title() {
        let mut out = Vec::new();
        write_hourly(&mut out, &rows()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("📊 Average Cars by Hour:\n"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn csv_has_header_and_unrounded_values() {
        let mut out = Vec::new();
        write_hourly_csv(&mut out, &rows()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Hour,Average Car Count");
        assert_eq!(lines[1], "08,3.5");
        assert!(lines[2].starts_with("17,6.666"));
    }

    #[test]
    fn empty_table_exports_header_only() {
        let mut out = Vec::new();
        write_hourly_csv(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hour,Average Car Count\n");
    }
}
