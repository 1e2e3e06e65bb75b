//! Ranked per-entity report: one CSV row per university, sorted by GPUs per student.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use gps_common::config::MetricsConfig;
use gps_common::util::single_line;
use gps_common::{Error, ResultExt};

use crate::metrics::{compute, MetricRow, PriceTable};
use crate::record::{GpuModel, ResearchRecord};

/// Leaderboard length logged after every report build.
pub const LEADERBOARD_SIZE: usize = 15;

const MISSING_URL: &str = "#";

/// One ranked report line.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub rank: usize,
    pub record: ResearchRecord,
    pub url: String,
    pub metrics: MetricRow,
}

impl ReportRow {
    pub fn university(&self) -> &str {
        &self.record.entity_name
    }

    /// GPU notes, student notes, cited URLs and credit value on one line.
    pub fn notes(&self) -> String {
        let record = &self.record;
        let mut head: Vec<&str> = Vec::new();
        for part in [&record.gpus.notes, &record.students.notes] {
            let part = part.trim();
            if !part.is_empty() {
                head.push(part);
            }
        }

        let mut parts = Vec::new();
        if !head.is_empty() {
            parts.push(head.join(" ; "));
        }
        if !record.sources.is_empty() {
            let urls: Vec<&str> = record.sources.iter().map(|s| s.url.as_str()).collect();
            parts.push(format!("Sources: {}", urls.join(", ")));
        }
        let credits = record.compute_credits.total_annual_value_usd;
        if credits > 0.0 {
            parts.push(format!("Credits: ${credits:.0}"));
        }
        single_line(&parts.join(" | "))
    }
}

/// Compute metrics for every record and rank by ratio, highest first.
///
/// Ties keep alphabetical order. `urls` maps entity name to homepage.
pub fn build_rows(
    records: Vec<ResearchRecord>,
    urls: &HashMap<String, String>,
    prices: &PriceTable,
    metrics: &MetricsConfig,
) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = records
        .into_iter()
        .map(|record| {
            let url = urls
                .get(&record.entity_name)
                .filter(|u| !u.is_empty())
                .cloned()
                .unwrap_or_else(|| MISSING_URL.to_string());
            ReportRow {
                rank: 0,
                metrics: compute(&record, prices, metrics),
                record,
                url,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.metrics
            .ratio
            .total_cmp(&a.metrics.ratio)
            .then_with(|| a.university().cmp(b.university()))
    });
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    rows
}

fn header() -> Vec<String> {
    let mut header: Vec<String> = [
        "rank",
        "university",
        "url",
        "undergrad",
        "ms",
        "phd",
        "weighted_students",
        "Notes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(GpuModel::ALL.iter().map(|m| m.display_name().to_string()));
    header.extend(
        ["total_gpu_value", "h100_equivalent", "gpus_per_student", "sources"]
            .iter()
            .map(|s| s.to_string()),
    );
    header
}

fn row_fields(row: &ReportRow) -> Vec<String> {
    let record = &row.record;
    let mut fields = vec![
        row.rank.to_string(),
        record.entity_name.clone(),
        row.url.clone(),
        record.students.undergrad.to_string(),
        record.students.masters.to_string(),
        record.students.phd.to_string(),
        format!("{:.1}", row.metrics.weighted_students),
        row.notes(),
    ];
    fields.extend(GpuModel::ALL.iter().map(|m| record.gpus.count(*m).to_string()));
    fields.extend([
        format!("{:.0}", row.metrics.gpu_value),
        format!("{:.2}", row.metrics.gpu_equivalent),
        format!("{:.4}", row.metrics.ratio),
        record.sources.len().to_string(),
    ]);
    fields
}

pub fn write_csv<W: Write>(rows: &[ReportRow], writer: W) -> gps_common::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let csv_err = |e: csv::Error| Error::External(format!("CSV write failed: {e}"));

    wtr.write_record(header()).map_err(csv_err)?;
    for row in rows {
        wtr.write_record(row_fields(row)).map_err(csv_err)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the report to `path`, creating parent directories.
pub fn write_report(rows: &[ReportRow], path: &Path) -> gps_common::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context(format!("creating {}", parent.display()))?;
    }
    let file = fs::File::create(path).context(format!("creating {}", path.display()))?;
    write_csv(rows, file).context(format!("writing {}", path.display()))?;
    info!(path = %path.display(), rows = rows.len(), "Report written");
    Ok(())
}

/// Log the top rows of a ranked report.
pub fn log_leaderboard(rows: &[ReportRow]) {
    info!("Top {} by GPUs per weighted student", LEADERBOARD_SIZE.min(rows.len()));
    for row in rows.iter().take(LEADERBOARD_SIZE) {
        info!(
            rank = row.rank,
            university = row.university(),
            gpus_per_student = format!("{:.4}", row.metrics.ratio),
            h100_equivalent = format!("{:.1}", row.metrics.gpu_equivalent),
            weighted_students = format!("{:.0}", row.metrics.weighted_students),
            "Leaderboard"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Source;
    use chrono::NaiveDate;

    fn record(name: &str, undergrad: u64, h100: u64) -> ResearchRecord {
        let mut record = ResearchRecord::empty(name, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        record.students.undergrad = undergrad;
        record.gpus.h100_pcie_count = h100;
        record
    }

    fn rows(records: Vec<ResearchRecord>) -> Vec<ReportRow> {
        let urls = HashMap::from([("B University".to_string(), "https://b.edu".to_string())]);
        build_rows(records, &urls, &PriceTable::default(), &MetricsConfig::default())
    }

    #[test]
    fn test_rows_ranked_by_ratio() {
        let rows = rows(vec![
            record("A University", 1000, 10),
            record("B University", 100, 10),
            record("C University", 0, 50),
        ]);
        let order: Vec<&str> = rows.iter().map(|r| r.university()).collect();
        assert_eq!(order, vec!["B University", "A University", "C University"]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].url, "https://b.edu");
        assert_eq!(rows[1].url, "#");
        assert_eq!(rows[2].metrics.ratio, 0.0);
    }

    #[test]
    fn test_notes_single_line() {
        let mut record = record("A University", 1, 0);
        record.gpus.notes = "Cluster A\nCluster B".into();
        record.students.notes = "Fall 2024".into();
        record.add_source(Source::new("https://a.edu/hpc", ""));
        record.compute_credits.total_annual_value_usd = 50_000.0;

        let row = &rows(vec![record])[0];
        assert_eq!(
            row.notes(),
            "Cluster A Cluster B ; Fall 2024 | Sources: https://a.edu/hpc | Credits: $50000"
        );
    }

    #[test]
    fn test_csv_layout() {
        let mut buf = Vec::new();
        write_csv(&rows(vec![record("A University", 1000, 10)]), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("rank,university,url,undergrad,ms,phd,weighted_students,Notes,H100 SXM,H100 PCIe"));
        assert!(header.ends_with("total_gpu_value,h100_equivalent,gpus_per_student,sources"));

        let row = lines.next().unwrap();
        assert!(row.starts_with("1,A University,#,1000,0,0,450.0,,0,10,"));
        assert!(row.ends_with(",300000,10.00,0.0222,0"));
    }

    #[test]
    fn test_write_report_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.csv");
        write_report(&rows(vec![record("A University", 1, 1)]), &path).unwrap();
        assert!(path.is_file());
    }
}
