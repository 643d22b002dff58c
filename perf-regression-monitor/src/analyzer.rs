//! 基线回归分析
//!
//! 把一次运行的读数与类别基线比较，按阈值给出严重程度。
//! 纯函数：不读写任何状态，是否更新基线由调用方决定。

use std::collections::BTreeMap;

use crate::config::{MonitorConfig, ThresholdMode, Thresholds, default_category_config};
use crate::model::{
    BaselineSnapshot, ComparisonResult, ComparisonStatus, MetricCategory, MetricReading, Severity,
};
use crate::stats::{RunStatistics, percent_change};

/// 回归分析器，持有每个类别的阈值
#[derive(Debug, Clone)]
pub struct RegressionAnalyzer {
    thresholds: BTreeMap<MetricCategory, Thresholds>,
}

impl RegressionAnalyzer {
    /// 从配置创建分析器
    pub fn new(config: &MonitorConfig) -> Self {
        let thresholds = MetricCategory::ALL
            .into_iter()
            .map(|c| (c, config.category(c).thresholds))
            .collect();
        Self { thresholds }
    }

    /// 类别阈值
    pub fn thresholds(&self, category: MetricCategory) -> Thresholds {
        self.thresholds
            .get(&category)
            .copied()
            .unwrap_or_else(|| default_category_config(category).thresholds)
    }

    /// 汇总读数后与基线比较
    pub fn compare_readings(
        &self,
        category: MetricCategory,
        readings: &[MetricReading],
        baseline: &BaselineSnapshot,
    ) -> Vec<ComparisonResult> {
        let current = aggregate_readings(readings);
        compare(&current, baseline, &self.thresholds(category))
    }
}

/// 将同名读数合并为平均值
pub fn aggregate_readings(readings: &[MetricReading]) -> BTreeMap<String, f64> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for reading in readings {
        grouped
            .entry(reading.metric_name.clone())
            .or_default()
            .push(reading.value);
    }
    grouped
        .into_iter()
        .map(|(name, values)| {
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            (name, avg)
        })
        .collect()
}

/// 多次读数的指标的运行统计，单次读数的指标不记录
pub fn run_statistics(readings: &[MetricReading]) -> BTreeMap<String, RunStatistics> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for reading in readings {
        grouped
            .entry(reading.metric_name.clone())
            .or_default()
            .push(reading.value);
    }
    grouped
        .into_iter()
        .filter(|(_, values)| values.len() > 1)
        .filter_map(|(name, values)| RunStatistics::from_values(&values).map(|s| (name, s)))
        .collect()
}

/// 将当前值与基线比较
///
/// 只有同时存在于当前值和基线中的指标参与严重程度判定；
/// 基线中没有的指标标记为 `new`，不会阻塞构建。
pub fn compare(
    current: &BTreeMap<String, f64>,
    baseline: &BaselineSnapshot,
    thresholds: &Thresholds,
) -> Vec<ComparisonResult> {
    current
        .iter()
        .map(|(metric, &value)| compare_metric(metric, value, baseline.get(metric), thresholds))
        .collect()
}

fn compare_metric(
    metric: &str,
    current: f64,
    baseline: Option<f64>,
    thresholds: &Thresholds,
) -> ComparisonResult {
    let Some(reference) = baseline else {
        return ComparisonResult {
            metric: metric.to_string(),
            current,
            baseline: None,
            difference: None,
            percent_change: None,
            severity: Severity::Ok,
            status: ComparisonStatus::New,
        };
    };

    let difference = current - reference;
    let change = percent_change(reference, current);

    let (severity, status) = match thresholds.mode {
        ThresholdMode::Percent => match change {
            Some(pct) => (classify(pct.abs(), thresholds), ComparisonStatus::Compared),
            None => (Severity::Ok, ComparisonStatus::ZeroBaseline),
        },
        // 只有下降计为回归
        ThresholdMode::PointsDrop => (classify(-difference, thresholds), ComparisonStatus::Compared),
    };

    ComparisonResult {
        metric: metric.to_string(),
        current,
        baseline: Some(reference),
        difference: Some(difference),
        percent_change: change,
        severity,
        status,
    }
}

/// 按阈值划分严重程度，超过（不含等于）阈值才升级
pub fn classify(deviation: f64, thresholds: &Thresholds) -> Severity {
    if deviation > thresholds.critical {
        Severity::Critical
    } else if deviation > thresholds.warn {
        Severity::Warning
    } else {
        Severity::Ok
    }
}
