//! 统计基础函数
//!
//! 增长率估计、线性回归斜率与多次运行的汇总统计。所有序列都要求
//! 调用方预先按时间排序，这里不做校验。

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{MonitorError, Result};

/// 算术平均值，空序列返回 `None`
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// 百分比变化，基准为 0 时无定义
pub fn percent_change(reference: f64, current: f64) -> Option<f64> {
    if reference == 0.0 {
        return None;
    }
    Some((current - reference) / reference * 100.0)
}

/// 前后半段均值差
///
/// 在 `floor(n/2)` 处切分，返回后半段均值减去前半段均值。
/// 比首尾差更能平滑单点噪声。少于 2 个点返回 `None`。
pub fn mean_split_growth(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mid = values.len() / 2;
    let first = mean(&values[..mid])?;
    let second = mean(&values[mid..])?;
    Some(second - first)
}

/// 首尾差
pub fn total_delta(values: &[f64]) -> Option<f64> {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) if values.len() >= 2 => Some(last - first),
        _ => None,
    }
}

/// 简单线性回归拟合结果（自变量为下标 0..n-1）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// 斜率的双侧 t 检验 p 值
    pub slope_p_value: Option<f64>,
}

/// 最小二乘线性回归
pub fn linear_fit(values: &[f64]) -> Option<LinearFit> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let x_sum: f64 = (0..n).map(|i| i as f64).sum();
    let y_sum: f64 = values.iter().sum();
    let xy_sum: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| i as f64 * y)
        .sum();
    let x2_sum: f64 = (0..n).map(|i| (i as f64).powi(2)).sum();

    let denominator = nf * x2_sum - x_sum.powi(2);
    if denominator == 0.0 {
        return None;
    }
    let slope = (nf * xy_sum - x_sum * y_sum) / denominator;
    let intercept = (y_sum - slope * x_sum) / nf;

    let y_mean = y_sum / nf;
    let ss_tot: f64 = values.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };

    let slope_p_value = slope_significance(values, slope, ss_res).ok().flatten();

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
        slope_p_value,
    })
}

/// 斜率显著性，少于 3 个点或残差为 0 时无法估计
fn slope_significance(values: &[f64], slope: f64, ss_res: f64) -> Result<Option<f64>> {
    let n = values.len();
    if n < 3 {
        return Ok(None);
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let sxx: f64 = (0..n).map(|i| (i as f64 - x_mean).powi(2)).sum();
    let residual_variance = ss_res / (n - 2) as f64;
    if residual_variance == 0.0 || sxx == 0.0 {
        return Ok(None);
    }
    let standard_error = (residual_variance / sxx).sqrt();
    let t_statistic = slope / standard_error;
    let t_dist = StudentsT::new(0.0, 1.0, (n - 2) as f64)
        .map_err(|e| MonitorError::Statistics(e.to_string()))?;
    let p_value: f64 = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));
    Ok(Some(p_value.clamp(0.0, 1.0)))
}

/// 同一指标多次运行的汇总统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub samples: usize,
}

impl RunStatistics {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            mean: mean(values)?,
            median: percentile(&sorted, 50.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p95: percentile(&sorted, 95.0),
            samples: values.len(),
        })
    }
}

/// 线性插值百分位，输入必须已排序且非空
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// 增长率估计策略
///
/// 不同采样时长对应不同公式：短时突发泄漏检测使用前后半段均值差，
/// 长时间稳态监控使用首尾总增长。
pub trait GrowthEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    /// 估计有序序列的增长量，数据不足时返回 `None`
    fn estimate(&self, series: &[f64]) -> Option<f64>;
}

/// 前后半段均值差
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSplitGrowth;

impl GrowthEstimator for MeanSplitGrowth {
    fn name(&self) -> &'static str {
        "mean-split"
    }

    fn estimate(&self, series: &[f64]) -> Option<f64> {
        mean_split_growth(series)
    }
}

/// 首尾总增长
#[derive(Debug, Clone, Copy, Default)]
pub struct TotalDeltaGrowth;

impl GrowthEstimator for TotalDeltaGrowth {
    fn name(&self) -> &'static str {
        "total-delta"
    }

    fn estimate(&self, series: &[f64]) -> Option<f64> {
        total_delta(series)
    }
}
