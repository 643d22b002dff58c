//! 报告存储与渲染

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::aggregator::AggregateView;
use crate::config::{ReportFormat, StorageConfig};
use crate::error::Result;
use crate::model::{ComparisonStatus, MetricCategory, Report, Severity};
use crate::trend::TrendOutcome;

/// 报告目录，每次探针运行一个 JSON 文件
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
    max_per_category: usize,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>, max_per_category: usize) -> Self {
        Self {
            dir: dir.into(),
            max_per_category: max_per_category.max(1),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.reports_dir.clone(), config.max_reports_per_category)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 写入报告并清理超出保留窗口的旧报告
    pub fn write(&self, report: &Report) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(report.file_name());
        let json = serde_json::to_string_pretty(report)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!("Report written to {}", path.display());

        let removed = self.prune(report.category)?;
        if removed > 0 {
            tracing::debug!("Pruned {} old {} reports", removed, report.category);
        }
        Ok(path)
    }

    /// 按文件名中的类别标签列出报告文件，文件名按时间戳升序
    fn files_by_category(&self) -> Result<BTreeMap<MetricCategory, Vec<PathBuf>>> {
        let mut files: BTreeMap<MetricCategory, Vec<PathBuf>> = BTreeMap::new();
        if !self.dir.exists() {
            return Ok(files);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".json") {
                continue;
            }
            match MetricCategory::classify_file_name(name) {
                Some(category) => files.entry(category).or_default().push(path),
                None => tracing::debug!("Ignoring unrecognized report file {}", name),
            }
        }
        for paths in files.values_mut() {
            paths.sort();
        }
        Ok(files)
    }

    /// 加载全部报告，按类别分组并按时间戳排序；损坏的文件被跳过
    pub fn load_all(&self) -> Result<BTreeMap<MetricCategory, Vec<Report>>> {
        let mut all = BTreeMap::new();
        for (category, paths) in self.files_by_category()? {
            let mut reports: Vec<Report> = paths.iter().filter_map(|p| read_report(p)).collect();
            reports.sort_by_key(|r| r.timestamp);
            if !reports.is_empty() {
                all.insert(category, reports);
            }
        }
        Ok(all)
    }

    /// 加载单个类别的报告
    pub fn load_category(&self, category: MetricCategory) -> Result<Vec<Report>> {
        Ok(self.load_all()?.remove(&category).unwrap_or_default())
    }

    /// 只保留类别最新的若干个报告文件，返回删除数量
    pub fn prune(&self, category: MetricCategory) -> Result<usize> {
        let files = self.files_by_category()?;
        let Some(paths) = files.get(&category) else {
            return Ok(0);
        };
        let excess = paths.len().saturating_sub(self.max_per_category);
        for path in &paths[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }
}

fn read_report(path: &Path) -> Option<Report> {
    let parsed = fs::read_to_string(path)
        .map_err(crate::error::MonitorError::from)
        .and_then(|content| Ok(serde_json::from_str::<Report>(&content)?));
    match parsed {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!("Skipping unreadable report {}: {}", path.display(), e);
            None
        }
    }
}

/// 报告渲染器
#[derive(Debug, Clone, Copy)]
pub struct ReportRenderer {
    format: ReportFormat,
}

impl ReportRenderer {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    /// 渲染单次运行报告
    pub fn render_run(&self, report: &Report) -> Result<String> {
        match self.format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
            ReportFormat::Text => Ok(run_text(report)),
            ReportFormat::Markdown => Ok(run_markdown(report)),
        }
    }

    /// 渲染汇总视图
    pub fn render_aggregate(&self, view: &AggregateView) -> Result<String> {
        match self.format {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(view)?),
            ReportFormat::Text => Ok(aggregate_text(view)),
            ReportFormat::Markdown => Ok(aggregate_markdown(view)),
        }
    }

    /// 保存汇总报告到文件
    pub fn save_aggregate(&self, view: &AggregateView, path: &Path) -> Result<()> {
        let content = self.render_aggregate(view)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}

fn format_change(change: Option<f64>, status: ComparisonStatus) -> String {
    match (status, change) {
        (ComparisonStatus::New, _) => "new".to_string(),
        (ComparisonStatus::ZeroBaseline, _) => "n/a".to_string(),
        (ComparisonStatus::Compared, Some(pct)) => format!("{:+.2}%", pct),
        (ComparisonStatus::Compared, None) => "-".to_string(),
    }
}

fn severity_badge(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴 critical",
        Severity::Warning => "🟡 warning",
        Severity::Ok => "✅ ok",
    }
}

fn run_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("性能报告: {}\n", report.category));
    out.push_str("================\n\n");
    out.push_str(&format!("时间: {}\n", report.timestamp.format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&format!("警告: {}\n", report.summary.warnings));
    out.push_str(&format!("错误: {}\n", report.summary.errors));
    out.push_str(&format!("新指标: {}\n\n", report.summary.new_metrics));

    for c in &report.comparisons {
        out.push_str(&format!(
            "{:<32} {:>14.2} {:>14} {:>10} {}\n",
            c.metric,
            c.current,
            c.baseline.map(|b| format!("{:.2}", b)).unwrap_or_else(|| "-".to_string()),
            format_change(c.percent_change, c.status),
            c.severity
        ));
    }

    if let Some(leak) = &report.leak {
        out.push_str(&format!(
            "\n泄漏检测: {} (类型: {}, 置信度: {})\n",
            if leak.leak_detected { "发现泄漏" } else { "未发现" },
            leak.leak_type,
            leak.confidence
        ));
    }
    if let Some(trend) = &report.memory_trend {
        out.push_str(&format!(
            "\n内存趋势: {} ({:+.1} MB, {} 个样本)\n",
            trend.trend,
            trend.total_growth_bytes / (1024.0 * 1024.0),
            trend.sample_count
        ));
    }
    out
}

fn run_markdown(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("# 性能报告: {}\n\n", report.category));
    out.push_str(&format!(
        "- 时间: {}\n- 警告: {}\n- 错误: {}\n- 新指标: {}\n\n",
        report.timestamp.format("%Y-%m-%d %H:%M:%S"),
        report.summary.warnings,
        report.summary.errors,
        report.summary.new_metrics
    ));

    if !report.comparisons.is_empty() {
        out.push_str("| 指标 | 当前值 | 基准值 | 变化 | 严重程度 |\n");
        out.push_str("|------|--------|--------|------|----------|\n");
        for c in &report.comparisons {
            out.push_str(&format!(
                "| {} | {:.2} | {} | {} | {} |\n",
                c.metric,
                c.current,
                c.baseline.map(|b| format!("{:.2}", b)).unwrap_or_else(|| "-".to_string()),
                format_change(c.percent_change, c.status),
                severity_badge(c.severity)
            ));
        }
    }
    out
}

fn trend_cell(outcome: &TrendOutcome) -> String {
    match outcome {
        TrendOutcome::InsufficientData { sample_count } => {
            format!("数据不足 ({} 个样本)", sample_count)
        }
        TrendOutcome::Trend(t) => format!(
            "{} ({:+.1}%, 斜率 {:.2}, {} 个样本)",
            t.direction, t.percent_change, t.slope, t.sample_count
        ),
    }
}

fn aggregate_text(view: &AggregateView) -> String {
    let mut out = String::new();
    out.push_str("性能汇总报告\n");
    out.push_str("============\n\n");
    out.push_str(&format!("报告总数: {}\n", view.summary.total_reports));
    out.push_str(&format!("时间跨度: {:.1} 小时\n", view.summary.period_hours));
    out.push_str(&format!("问题报告: {}\n\n", view.summary.alerts.len()));

    if !view.trends.is_empty() {
        out.push_str("趋势:\n");
        for (category, outcome) in &view.trends {
            out.push_str(&format!("  {:<18} {}\n", category.tag(), trend_cell(outcome)));
        }
        out.push('\n');
    }

    if view.recommendations.is_empty() {
        out.push_str("暂无建议。\n");
    } else {
        out.push_str("建议:\n");
        for r in &view.recommendations {
            out.push_str(&format!("  [{}] {}: {}\n", r.priority, r.category, r.message));
        }
    }
    out
}

fn aggregate_markdown(view: &AggregateView) -> String {
    let mut out = String::new();
    out.push_str("# 性能汇总报告\n\n");
    out.push_str(&format!(
        "生成时间: {}\n\n",
        view.generated_at.format("%Y-%m-%d %H:%M:%S")
    ));

    out.push_str("## 统计信息\n\n");
    out.push_str(&format!("- 报告总数: {}\n", view.summary.total_reports));
    out.push_str(&format!("- 时间跨度: {:.1} 小时\n", view.summary.period_hours));
    out.push_str(&format!("- 问题报告: {}\n\n", view.summary.alerts.len()));

    if !view.summary.latest.is_empty() {
        out.push_str("## 最新结果\n\n");
        out.push_str("| 类别 | 时间 | 警告 | 错误 |\n");
        out.push_str("|------|------|------|------|\n");
        for (category, report) in &view.summary.latest {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                category,
                report.timestamp.format("%Y-%m-%d %H:%M:%S"),
                report.summary.warnings,
                report.summary.errors
            ));
        }
        out.push('\n');
    }

    if !view.trends.is_empty() {
        out.push_str("## 趋势\n\n");
        out.push_str("| 类别 | 指标 | 趋势 |\n");
        out.push_str("|------|------|------|\n");
        for (category, outcome) in &view.trends {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                category,
                category.headline_metric(),
                trend_cell(outcome)
            ));
        }
        out.push('\n');
    }

    out.push_str("## 建议\n\n");
    if view.recommendations.is_empty() {
        out.push_str("暂无建议。\n");
    } else {
        for r in &view.recommendations {
            out.push_str(&format!("- **{}** ({}): {}\n", r.priority, r.category, r.message));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    use crate::aggregator::ReportAggregator;
    use crate::model::{ComparisonResult, MetricReading, MetricUnit};

    fn bundle_report(timestamp: DateTime<Utc>, total: f64) -> Report {
        Report::new(
            MetricCategory::BundleSize,
            timestamp,
            vec![MetricReading::new(
                MetricCategory::BundleSize,
                "total_size",
                total,
                MetricUnit::Bytes,
                timestamp,
            )],
            vec![ComparisonResult {
                metric: "total_size".to_string(),
                current: total,
                baseline: None,
                difference: None,
                percent_change: None,
                severity: Severity::Ok,
                status: ComparisonStatus::New,
            }],
        )
    }

    #[test]
    fn test_write_and_load_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReportStore::new(dir.path(), 10);
        let now = Utc::now();
        store.write(&bundle_report(now, 150.0))?;
        store.write(&bundle_report(now - Duration::hours(2), 100.0))?;
        store.write(&bundle_report(now - Duration::hours(1), 120.0))?;

        let all = store.load_all()?;
        let values: Vec<f64> = all[&MetricCategory::BundleSize]
            .iter()
            .filter_map(|r| r.metric_value("total_size"))
            .collect();
        assert_eq!(values, vec![100.0, 120.0, 150.0]);
        Ok(())
    }

    #[test]
    fn test_corrupt_and_foreign_files_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReportStore::new(dir.path(), 10);
        store.write(&bundle_report(Utc::now(), 100.0))?;
        fs::write(dir.path().join("bundle-size-broken.json"), "{ truncated")?;
        fs::write(dir.path().join("notes.json"), "{}")?;
        fs::write(dir.path().join("load-time-readme.txt"), "text")?;

        let all = store.load_all()?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[&MetricCategory::BundleSize].len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_dir_loads_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReportStore::new(dir.path().join("never-created"), 10);
        assert!(store.load_all()?.is_empty());
        assert!(store.load_category(MetricCategory::LoadTime)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_retention_keeps_newest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ReportStore::new(dir.path(), 2);
        let now = Utc::now();
        for hours in [3, 2, 1, 0] {
            store.write(&bundle_report(now - Duration::hours(hours), 100.0 + hours as f64))?;
        }
        let kept = store.load_category(MetricCategory::BundleSize)?;
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].timestamp, now);
        assert_eq!(kept[0].timestamp, now - Duration::hours(1));
        Ok(())
    }

    #[test]
    fn test_render_formats() -> Result<()> {
        let report = bundle_report(Utc::now(), 100.0);

        let text = ReportRenderer::new(ReportFormat::Text).render_run(&report)?;
        assert!(text.contains("bundle-size"));
        assert!(text.contains("new"));

        let markdown = ReportRenderer::new(ReportFormat::Markdown).render_run(&report)?;
        assert!(markdown.starts_with("# "));
        assert!(markdown.contains("| total_size |"));

        let json = ReportRenderer::new(ReportFormat::Json).render_run(&report)?;
        let parsed: Report = serde_json::from_str(&json)?;
        assert_eq!(parsed.category, MetricCategory::BundleSize);
        Ok(())
    }

    #[test]
    fn test_save_aggregate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut all = BTreeMap::new();
        all.insert(MetricCategory::BundleSize, vec![bundle_report(Utc::now(), 100.0)]);
        let view = ReportAggregator::default().aggregate(&all);

        let path = dir.path().join("out/summary.md");
        ReportRenderer::new(ReportFormat::Markdown).save_aggregate(&view, &path)?;
        let content = fs::read_to_string(&path)?;
        assert!(content.contains("## 趋势"));
        assert!(content.contains("total_size"));
        Ok(())
    }
}
