//! 历史报告汇总
//!
//! 只依赖持久化的报告历史，不接触探针。输出汇总信息、各类别主指标的
//! 趋势以及按优先级排序的建议列表。建议每次重新生成，不持久化。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{MetricCategory, Report};
use crate::trend::{TrendAnalyzer, TrendDirection, TrendOutcome};

/// 性能分数低于此值时建议优化
pub const DEFAULT_SCORE_FLOOR: f64 = 70.0;
/// 产物大小增长超过此百分比时建议持续关注
pub const DEFAULT_BUNDLE_GROWTH_PCT: f64 = 10.0;

/// 建议优先级，数值越小越靠前
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// 优化建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub category: MetricCategory,
    pub message: String,
    pub details: serde_json::Value,
}

/// 带有警告或错误的历史报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOccurrence {
    pub category: MetricCategory,
    pub timestamp: DateTime<Utc>,
    pub warnings: usize,
    pub errors: usize,
}

/// 汇总信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub total_reports: usize,
    pub alerts: Vec<AlertOccurrence>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// 最早与最晚报告之间的小时数
    pub period_hours: f64,
    /// 每个类别时间上最新的报告
    pub latest: BTreeMap<MetricCategory, Report>,
}

/// 汇总视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateView {
    pub generated_at: DateTime<Utc>,
    pub summary: AggregateSummary,
    pub trends: BTreeMap<MetricCategory, TrendOutcome>,
    pub recommendations: Vec<Recommendation>,
}

/// 报告汇总器
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    trend: TrendAnalyzer,
    score_floor: f64,
    bundle_growth_pct: f64,
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self {
            trend: TrendAnalyzer::default(),
            score_floor: DEFAULT_SCORE_FLOOR,
            bundle_growth_pct: DEFAULT_BUNDLE_GROWTH_PCT,
        }
    }
}

impl ReportAggregator {
    pub fn new(trend: TrendAnalyzer) -> Self {
        Self {
            trend,
            ..Self::default()
        }
    }

    /// 汇总全部历史报告，各类别内的报告顺序不作要求
    pub fn aggregate(&self, all_reports: &BTreeMap<MetricCategory, Vec<Report>>) -> AggregateView {
        let summary = summarize(all_reports);

        let trends: BTreeMap<MetricCategory, TrendOutcome> = all_reports
            .iter()
            .filter(|(_, reports)| !reports.is_empty())
            .map(|(category, reports)| {
                (
                    *category,
                    self.trend.analyze_reports(reports, category.headline_metric()),
                )
            })
            .collect();

        let recommendations = self.recommend(&summary, &trends);
        tracing::info!(
            "Aggregated {} reports into {} trends and {} recommendations",
            summary.total_reports,
            trends.len(),
            recommendations.len()
        );

        AggregateView {
            generated_at: Utc::now(),
            summary,
            trends,
            recommendations,
        }
    }

    /// 规则相互独立、结果累加，不做跨规则去重
    fn recommend(
        &self,
        summary: &AggregateSummary,
        trends: &BTreeMap<MetricCategory, TrendOutcome>,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        if let Some(bundle) = summary.latest.get(&MetricCategory::BundleSize) {
            let critical_count = bundle.critical_count();
            if critical_count > 0 {
                let metrics: Vec<&str> = bundle
                    .comparisons
                    .iter()
                    .filter(|c| c.severity == crate::model::Severity::Critical)
                    .map(|c| c.metric.as_str())
                    .collect();
                recommendations.push(Recommendation {
                    priority: Priority::High,
                    category: MetricCategory::BundleSize,
                    message: "Bundle size grew past the critical threshold; consider code splitting and lazy-loading large modules".to_string(),
                    details: serde_json::json!({
                        "critical_count": critical_count,
                        "metrics": metrics,
                    }),
                });
            }
        }

        if let Some(score) = summary
            .latest
            .get(&MetricCategory::PerformanceTest)
            .and_then(|r| r.metric_value("score"))
            && score < self.score_floor
        {
            recommendations.push(Recommendation {
                priority: Priority::High,
                category: MetricCategory::PerformanceTest,
                message: format!(
                    "Performance score {:.1} is below {:.0}; profile hot paths and optimize",
                    score, self.score_floor
                ),
                details: serde_json::json!({ "score": score, "floor": self.score_floor }),
            });
        }

        if let Some(leak) = summary
            .latest
            .get(&MetricCategory::LeakDetection)
            .and_then(|r| r.leak.as_ref())
            && leak.leak_detected
        {
            recommendations.push(Recommendation {
                priority: Priority::Critical,
                category: MetricCategory::LeakDetection,
                message: format!(
                    "Active {} leak detected (confidence: {}); review resource cleanup",
                    leak.leak_type, leak.confidence
                ),
                details: serde_json::to_value(leak).unwrap_or(serde_json::Value::Null),
            });
        }

        if let Some(trend) = trends.get(&MetricCategory::BundleSize).and_then(|t| t.result())
            && trend.direction == TrendDirection::Increasing
            && trend.percent_change > self.bundle_growth_pct
            && trend.slope > 0.0
        {
            recommendations.push(Recommendation {
                priority: Priority::Medium,
                category: MetricCategory::BundleSize,
                message: format!(
                    "Bundle size is trending upward ({:+.1}% over {} reports); monitor new dependencies",
                    trend.percent_change, trend.sample_count
                ),
                details: serde_json::json!({
                    "percent_change": trend.percent_change,
                    "slope": trend.slope,
                    "first_value": trend.first_value,
                    "last_value": trend.last_value,
                }),
            });
        }

        // 稳定排序，同优先级保持插入顺序
        recommendations.sort_by_key(|r| r.priority);
        recommendations
    }
}

fn summarize(all_reports: &BTreeMap<MetricCategory, Vec<Report>>) -> AggregateSummary {
    let mut total_reports = 0;
    let mut alerts = Vec::new();
    let mut latest: BTreeMap<MetricCategory, Report> = BTreeMap::new();
    let mut period_start: Option<DateTime<Utc>> = None;
    let mut period_end: Option<DateTime<Utc>> = None;

    for (category, reports) in all_reports {
        total_reports += reports.len();
        for report in reports {
            if report.summary.has_issues() {
                alerts.push(AlertOccurrence {
                    category: *category,
                    timestamp: report.timestamp,
                    warnings: report.summary.warnings,
                    errors: report.summary.errors,
                });
            }
            period_start = Some(period_start.map_or(report.timestamp, |t| t.min(report.timestamp)));
            period_end = Some(period_end.map_or(report.timestamp, |t| t.max(report.timestamp)));
        }
        // 文件列举顺序不保证时间顺序
        if let Some(newest) = reports.iter().max_by_key(|r| r.timestamp) {
            latest.insert(*category, newest.clone());
        }
    }
    alerts.sort_by_key(|a| a.timestamp);

    let period_hours = match (period_start, period_end) {
        (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 3_600_000.0,
        _ => 0.0,
    };

    AggregateSummary {
        total_reports,
        alerts,
        period_start,
        period_end,
        period_hours,
        latest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::leak::{Confidence, LeakAnalysisResult, LeakGrowthRates, LeakType};
    use crate::model::{ComparisonResult, ComparisonStatus, MetricReading, MetricUnit, Severity};

    fn report_at(
        category: MetricCategory,
        timestamp: DateTime<Utc>,
        metric: &str,
        value: f64,
        severity: Severity,
    ) -> Report {
        let comparison = ComparisonResult {
            metric: metric.to_string(),
            current: value,
            baseline: Some(value),
            difference: Some(0.0),
            percent_change: Some(0.0),
            severity,
            status: ComparisonStatus::Compared,
        };
        Report::new(
            category,
            timestamp,
            vec![MetricReading::new(category, metric, value, MetricUnit::Count, timestamp)],
            vec![comparison],
        )
    }

    #[test]
    fn test_increasing_bundle_trend_yields_monitor_recommendation() {
        let start = Utc::now() - Duration::hours(10);
        let reports: Vec<Report> = [100.0, 120.0, 150.0]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                report_at(
                    MetricCategory::BundleSize,
                    start + Duration::hours(i as i64 * 5),
                    "total_size",
                    *v,
                    Severity::Ok,
                )
            })
            .collect();
        let mut all = BTreeMap::new();
        all.insert(MetricCategory::BundleSize, reports);

        let view = ReportAggregator::default().aggregate(&all);
        let trend = view.trends[&MetricCategory::BundleSize].result().unwrap();
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert!((trend.percent_change - 50.0).abs() < 1e-9);

        assert_eq!(view.recommendations.len(), 1);
        assert_eq!(view.recommendations[0].priority, Priority::Medium);
        assert_eq!(view.recommendations[0].category, MetricCategory::BundleSize);
        assert_eq!(view.summary.total_reports, 3);
        assert!((view.summary.period_hours - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_latest_uses_timestamp_not_listing_order() {
        let now = Utc::now();
        let newest = report_at(MetricCategory::BundleSize, now, "total_size", 100.0, Severity::Critical);
        let older = report_at(
            MetricCategory::BundleSize,
            now - Duration::hours(1),
            "total_size",
            100.0,
            Severity::Ok,
        );
        let mut all = BTreeMap::new();
        all.insert(MetricCategory::BundleSize, vec![newest, older]);

        let view = ReportAggregator::default().aggregate(&all);
        assert_eq!(view.summary.latest[&MetricCategory::BundleSize].timestamp, now);
        let high: Vec<&Recommendation> = view
            .recommendations
            .iter()
            .filter(|r| r.priority == Priority::High)
            .collect();
        assert_eq!(high.len(), 1);
        assert_eq!(view.summary.alerts.len(), 1);
        assert_eq!(view.summary.alerts[0].errors, 1);
    }

    #[test]
    fn test_recommendations_sorted_by_priority() {
        let now = Utc::now();
        let mut leak_report = report_at(MetricCategory::LeakDetection, now, "final_heap_bytes", 1.0, Severity::Ok);
        leak_report.leak = Some(LeakAnalysisResult {
            leak_detected: true,
            leak_type: LeakType::Memory,
            confidence: Confidence::High,
            triggered: Vec::new(),
            metrics: LeakGrowthRates::default(),
            sample_count: 10,
        });

        let mut all = BTreeMap::new();
        all.insert(
            MetricCategory::BundleSize,
            vec![report_at(MetricCategory::BundleSize, now, "main.js", 1.0, Severity::Critical)],
        );
        all.insert(
            MetricCategory::PerformanceTest,
            vec![report_at(MetricCategory::PerformanceTest, now, "score", 55.0, Severity::Ok)],
        );
        all.insert(MetricCategory::LeakDetection, vec![leak_report]);

        let view = ReportAggregator::default().aggregate(&all);
        let order: Vec<(Priority, MetricCategory)> = view
            .recommendations
            .iter()
            .map(|r| (r.priority, r.category))
            .collect();
        assert_eq!(
            order,
            vec![
                (Priority::Critical, MetricCategory::LeakDetection),
                (Priority::High, MetricCategory::BundleSize),
                (Priority::High, MetricCategory::PerformanceTest),
            ]
        );
    }

    #[test]
    fn test_single_report_has_insufficient_trend() {
        let mut all = BTreeMap::new();
        all.insert(
            MetricCategory::LoadTime,
            vec![report_at(MetricCategory::LoadTime, Utc::now(), "load_complete_ms", 900.0, Severity::Ok)],
        );
        let view = ReportAggregator::default().aggregate(&all);
        assert_eq!(
            view.trends[&MetricCategory::LoadTime],
            TrendOutcome::InsufficientData { sample_count: 1 }
        );
        assert_eq!(view.summary.period_hours, 0.0);
        assert!(view.recommendations.is_empty());
    }

    #[test]
    fn test_empty_history() {
        let view = ReportAggregator::default().aggregate(&BTreeMap::new());
        assert_eq!(view.summary.total_reports, 0);
        assert!(view.trends.is_empty());
        assert!(view.summary.period_start.is_none());
    }

    #[test]
    fn test_priority_rank() {
        assert_eq!(Priority::Critical as u8, 0);
        assert_eq!(Priority::Low as u8, 3);
        assert!(Priority::High < Priority::Medium);
    }
}
