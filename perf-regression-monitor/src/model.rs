//! 性能监控数据模型
//!
//! 读数、基线快照、比较结果、报告与告警。除基线外，其余类型均为
//! 一次性生成、不可变的视图或事件记录。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::leak::{LeakAnalysisResult, MemoryTrendAssessment};
use crate::stats::RunStatistics;

/// 监控的指标类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricCategory {
    /// 构建产物大小
    #[serde(rename = "bundle-size")]
    BundleSize,
    /// 页面加载时间
    #[serde(rename = "load-time")]
    LoadTime,
    /// 内存使用
    #[serde(rename = "memory-usage")]
    MemoryUsage,
    /// 内存泄漏检测
    #[serde(rename = "memory-leak")]
    LeakDetection,
    /// 基准/性能测试
    #[serde(rename = "performance-test")]
    PerformanceTest,
}

impl MetricCategory {
    /// 全部类别，按探针执行顺序排列
    pub const ALL: [MetricCategory; 5] = [
        MetricCategory::BundleSize,
        MetricCategory::LoadTime,
        MetricCategory::MemoryUsage,
        MetricCategory::LeakDetection,
        MetricCategory::PerformanceTest,
    ];

    /// 文件名与告警类型中使用的标签
    pub fn tag(self) -> &'static str {
        match self {
            MetricCategory::BundleSize => "bundle-size",
            MetricCategory::LoadTime => "load-time",
            MetricCategory::MemoryUsage => "memory-usage",
            MetricCategory::LeakDetection => "memory-leak",
            MetricCategory::PerformanceTest => "performance-test",
        }
    }

    /// 从标签解析类别
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// 按文件名中包含的标签对报告文件分类
    pub fn classify_file_name(file_name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| file_name.contains(c.tag()))
    }

    /// 趋势分析所跟踪的主指标
    pub fn headline_metric(self) -> &'static str {
        match self {
            MetricCategory::BundleSize => "total_size",
            MetricCategory::LoadTime => "load_complete_ms",
            MetricCategory::MemoryUsage => "peak_heap_bytes",
            MetricCategory::LeakDetection => "final_heap_bytes",
            MetricCategory::PerformanceTest => "score",
        }
    }

    /// 探针失败时的告警类型
    pub fn failure_alert_type(self) -> String {
        format!("{}-failure", self.tag())
    }
}

impl fmt::Display for MetricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// 指标单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricUnit {
    Bytes,
    Milliseconds,
    Count,
    Points,
}

impl MetricUnit {
    pub fn suffix(self) -> &'static str {
        match self {
            MetricUnit::Bytes => "B",
            MetricUnit::Milliseconds => "ms",
            MetricUnit::Count => "",
            MetricUnit::Points => "pts",
        }
    }
}

/// 单次测量读数，由探针产生后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub category: MetricCategory,
    pub metric_name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: DateTime<Utc>,
}

impl MetricReading {
    pub fn new(
        category: MetricCategory,
        metric_name: impl Into<String>,
        value: f64,
        unit: MetricUnit,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            category,
            metric_name: metric_name.into(),
            value,
            unit,
            timestamp,
        }
    }
}

/// 某一类别最后一次被接受的测量集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub category: MetricCategory,
    pub values: BTreeMap<String, f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BaselineSnapshot {
    /// 空基线（首次运行或基线损坏）
    pub fn empty(category: MetricCategory) -> Self {
        Self {
            category,
            values: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn from_values(
        category: MetricCategory,
        values: BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            category,
            values,
            timestamp: Some(timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// 严重程度分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// 比较状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonStatus {
    /// 与基线正常比较
    Compared,
    /// 基线中不存在的新指标
    New,
    /// 基线值为 0，无法计算百分比
    ZeroBaseline,
}

/// 单个指标与基线的比较结果，只作为报告的一部分持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub metric: String,
    pub current: f64,
    pub baseline: Option<f64>,
    pub difference: Option<f64>,
    pub percent_change: Option<f64>,
    pub severity: Severity,
    pub status: ComparisonStatus,
}

/// 报告摘要
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub warnings: usize,
    pub errors: usize,
    #[serde(default)]
    pub new_metrics: usize,
}

impl ReportSummary {
    pub fn from_comparisons(comparisons: &[ComparisonResult]) -> Self {
        let mut summary = Self::default();
        for comparison in comparisons {
            match (comparison.status, comparison.severity) {
                (ComparisonStatus::New, _) => summary.new_metrics += 1,
                (_, Severity::Warning) => summary.warnings += 1,
                (_, Severity::Critical) => summary.errors += 1,
                (_, Severity::Ok) => {}
            }
        }
        summary
    }

    pub fn has_issues(&self) -> bool {
        self.warnings > 0 || self.errors > 0
    }
}

/// 运行环境信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// CPU核心数
    pub cpu_cores: usize,
    /// 操作系统
    pub os: String,
    /// 处理器架构
    pub arch: String,
    /// 构建配置
    pub build_profile: String,
}

impl EnvironmentInfo {
    /// 收集系统环境信息
    pub fn collect() -> Self {
        Self {
            cpu_cores: num_cpus::get(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            build_profile: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
        }
    }
}

/// 一次探针运行的持久化报告（只追加，不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub category: MetricCategory,
    pub readings: Vec<MetricReading>,
    pub comparisons: Vec<ComparisonResult>,
    pub summary: ReportSummary,
    /// 同一指标多次读数的统计
    #[serde(default)]
    pub statistics: BTreeMap<String, RunStatistics>,
    #[serde(default)]
    pub environment: EnvironmentInfo,
    #[serde(default)]
    pub leak: Option<LeakAnalysisResult>,
    #[serde(default)]
    pub memory_trend: Option<MemoryTrendAssessment>,
}

impl Report {
    pub fn new(
        category: MetricCategory,
        timestamp: DateTime<Utc>,
        readings: Vec<MetricReading>,
        comparisons: Vec<ComparisonResult>,
    ) -> Self {
        let summary = ReportSummary::from_comparisons(&comparisons);
        Self {
            timestamp,
            category,
            readings,
            comparisons,
            summary,
            statistics: BTreeMap::new(),
            environment: EnvironmentInfo::collect(),
            leak: None,
            memory_trend: None,
        }
    }

    pub fn critical_count(&self) -> usize {
        self.comparisons
            .iter()
            .filter(|c| c.severity == Severity::Critical)
            .count()
    }

    pub fn has_critical(&self) -> bool {
        self.critical_count() > 0
    }

    /// 指标在本次运行中的值（多次读数取平均）
    pub fn metric_value(&self, metric: &str) -> Option<f64> {
        let values: Vec<f64> = self
            .readings
            .iter()
            .filter(|r| r.metric_name == metric)
            .map(|r| r.value)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    /// 报告文件名：`<tag>-<ISO-8601时间戳>.json`，':' 与 '.' 替换为 '-'
    pub fn file_name(&self) -> String {
        let stamp = self
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}-{}.json", self.category.tag(), stamp)
    }
}

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// 告警，由监控器立即分发，不单独持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    pub details: serde_json::Value,
    pub severity: AlertSeverity,
    pub category: Option<MetricCategory>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// 探针失败告警
    pub fn probe_failure(category: MetricCategory, error: &str) -> Self {
        Self {
            alert_type: category.failure_alert_type(),
            message: format!("{} probe failed: {}", category, error),
            details: serde_json::json!({ "error": error }),
            severity: AlertSeverity::Warning,
            category: Some(category),
            timestamp: Utc::now(),
        }
    }

    /// 基线偏差告警，`ok` 结果不产生告警
    pub fn regression(category: MetricCategory, comparison: &ComparisonResult) -> Option<Self> {
        let severity = match comparison.severity {
            Severity::Ok => return None,
            Severity::Warning => AlertSeverity::Warning,
            Severity::Critical => AlertSeverity::Critical,
        };
        let change = comparison.percent_change.unwrap_or(0.0);
        Some(Self {
            alert_type: format!("{}-regression", category.tag()),
            message: format!(
                "{} {} changed by {:+.1}% ({} -> {})",
                category,
                comparison.metric,
                change,
                comparison.baseline.unwrap_or(0.0),
                comparison.current
            ),
            details: serde_json::to_value(comparison).unwrap_or(serde_json::Value::Null),
            severity,
            category: Some(category),
            timestamp: Utc::now(),
        })
    }

    /// 内存泄漏告警
    pub fn leak(result: &LeakAnalysisResult) -> Self {
        Self {
            alert_type: "memory-leak".to_string(),
            message: format!(
                "Potential {} leak detected (confidence: {})",
                result.leak_type, result.confidence
            ),
            details: serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
            severity: AlertSeverity::Critical,
            category: Some(MetricCategory::LeakDetection),
            timestamp: Utc::now(),
        }
    }

    /// 长时间内存监控的持续增长告警
    pub fn memory_growth(assessment: &MemoryTrendAssessment) -> Self {
        Self {
            alert_type: "memory-growth".to_string(),
            message: format!(
                "Heap grew by {:.1} MB over {} samples ({})",
                assessment.total_growth_bytes / (1024.0 * 1024.0),
                assessment.sample_count,
                assessment.trend
            ),
            details: serde_json::to_value(assessment).unwrap_or(serde_json::Value::Null),
            severity: AlertSeverity::Warning,
            category: Some(MetricCategory::MemoryUsage),
            timestamp: Utc::now(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}
