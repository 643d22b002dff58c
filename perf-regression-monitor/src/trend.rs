//! 长期趋势分析
//!
//! 对历史报告中的某个指标序列计算方向、增长率和线性回归斜率。
//! 方向标签基于首尾百分比变化，下游规则使用斜率的符号和大小。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Report;
use crate::stats::{linear_fit, mean_split_growth};

/// 方向判定的稳定区间（百分比）
pub const DEFAULT_STABLE_BAND_PCT: f64 = 5.0;

/// 趋势方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
        };
        f.write_str(s)
    }
}

/// 趋势结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub direction: TrendDirection,
    /// 首尾百分比变化
    pub percent_change: f64,
    /// 最小二乘斜率（每个样本）
    pub slope: f64,
    /// 前后半段均值差
    pub growth_rate: f64,
    pub first_value: f64,
    pub last_value: f64,
    pub sample_count: usize,
    pub r_squared: f64,
    pub slope_p_value: Option<f64>,
}

/// 趋势分析输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum TrendOutcome {
    /// 少于 2 个数据点
    InsufficientData { sample_count: usize },
    Trend(TrendResult),
}

impl TrendOutcome {
    pub fn result(&self) -> Option<&TrendResult> {
        match self {
            TrendOutcome::Trend(result) => Some(result),
            TrendOutcome::InsufficientData { .. } => None,
        }
    }
}

/// 趋势分析器
#[derive(Debug, Clone, Copy)]
pub struct TrendAnalyzer {
    stable_band_pct: f64,
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self {
            stable_band_pct: DEFAULT_STABLE_BAND_PCT,
        }
    }
}

impl TrendAnalyzer {
    pub fn new(stable_band_pct: f64) -> Self {
        Self { stable_band_pct }
    }

    /// 分析按时间排序的序列
    pub fn analyze(&self, series: &[f64]) -> TrendOutcome {
        let sample_count = series.len();
        let (Some(growth_rate), Some(fit)) = (mean_split_growth(series), linear_fit(series)) else {
            return TrendOutcome::InsufficientData { sample_count };
        };
        let first_value = series[0];
        let last_value = series[sample_count - 1];
        let percent_change = endpoint_change(first_value, last_value);

        let direction = if percent_change > self.stable_band_pct {
            TrendDirection::Increasing
        } else if percent_change < -self.stable_band_pct {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        TrendOutcome::Trend(TrendResult {
            direction,
            percent_change,
            slope: fit.slope,
            growth_rate,
            first_value,
            last_value,
            sample_count,
            r_squared: fit.r_squared,
            slope_p_value: fit.slope_p_value,
        })
    }

    /// 对报告历史中的某个指标做趋势分析，报告按时间戳排序后取值
    pub fn analyze_reports(&self, reports: &[Report], metric: &str) -> TrendOutcome {
        self.analyze(&metric_series(reports, metric))
    }
}

/// 报告历史中某指标的时间序列，缺少该指标的报告被跳过
pub fn metric_series(reports: &[Report], metric: &str) -> Vec<f64> {
    let mut ordered: Vec<&Report> = reports.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);
    ordered
        .into_iter()
        .filter_map(|r| r.metric_value(metric))
        .collect()
}

/// 首值为 0 时百分比无定义：末值也为 0 视为 0%，否则按 ±100% 处理
fn endpoint_change(first: f64, last: f64) -> f64 {
    if first == 0.0 {
        if last == 0.0 {
            0.0
        } else {
            100.0 * last.signum()
        }
    } else {
        (last - first) / first.abs() * 100.0
    }
}
