//! 内存泄漏检测
//!
//! 两种启发式，分别对应不同的采样时长：
//! - [`LeakClassifier`]：短时突发检测，对堆大小、DOM 节点数、监听器数
//!   分别用前后半段均值差估计增长率，任一超过绝对阈值即判定泄漏。
//! - [`SteadyStateMemoryMonitor`]：长时间稳态监控，按首尾总增长分档。
//!
//! 两者共享 [`GrowthEstimator`] 原语，但不合并为同一公式。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{LeakThresholds, SteadyStateThresholds};
use crate::model::MetricCategory;
use crate::stats::{GrowthEstimator, MeanSplitGrowth, TotalDeltaGrowth};

/// 泄漏检测的单个采样点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeakSample {
    /// 已用堆大小（字节）
    pub heap_used: f64,
    /// DOM 节点数
    pub dom_nodes: f64,
    /// 事件监听器数
    pub listener_count: f64,
}

/// 泄漏类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeakType {
    Memory,
    Dom,
    EventListeners,
    None,
}

impl fmt::Display for LeakType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeakType::Memory => "memory",
            LeakType::Dom => "dom",
            LeakType::EventListeners => "event-listeners",
            LeakType::None => "none",
        };
        f.write_str(s)
    }
}

/// 置信度，按声明顺序递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    InsufficientData,
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::InsufficientData => "insufficient-data",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

/// 单个触发条件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeakTrigger {
    pub leak_type: LeakType,
    pub confidence: Confidence,
    pub growth_rate: f64,
    pub threshold: f64,
}

/// 各信号的增长率
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LeakGrowthRates {
    pub heap_bytes: Option<f64>,
    pub dom_nodes: Option<f64>,
    pub listeners: Option<f64>,
}

/// 泄漏判定结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakAnalysisResult {
    pub leak_detected: bool,
    /// 置信度最高的触发类型
    pub leak_type: LeakType,
    pub confidence: Confidence,
    /// 全部触发的条件，按 memory、dom、event-listeners 顺序
    pub triggered: Vec<LeakTrigger>,
    pub metrics: LeakGrowthRates,
    pub sample_count: usize,
}

impl LeakAnalysisResult {
    fn insufficient(sample_count: usize) -> Self {
        Self {
            leak_detected: false,
            leak_type: LeakType::None,
            confidence: Confidence::InsufficientData,
            triggered: Vec::new(),
            metrics: LeakGrowthRates::default(),
            sample_count,
        }
    }
}

/// 按类别选择增长率估计策略
pub fn estimator_for(category: MetricCategory) -> Box<dyn GrowthEstimator> {
    match category {
        MetricCategory::MemoryUsage => Box::new(TotalDeltaGrowth),
        _ => Box::new(MeanSplitGrowth),
    }
}

/// 短时突发泄漏分类器
pub struct LeakClassifier {
    thresholds: LeakThresholds,
    estimator: Box<dyn GrowthEstimator>,
}

impl LeakClassifier {
    pub fn new(thresholds: LeakThresholds) -> Self {
        Self {
            thresholds,
            estimator: estimator_for(MetricCategory::LeakDetection),
        }
    }

    /// 对按时间排序的采样做泄漏判定
    pub fn classify(&self, timeline: &[LeakSample]) -> LeakAnalysisResult {
        let sample_count = timeline.len();
        if sample_count < self.thresholds.min_samples.max(2) {
            return LeakAnalysisResult::insufficient(sample_count);
        }

        let heap: Vec<f64> = timeline.iter().map(|s| s.heap_used).collect();
        let dom: Vec<f64> = timeline.iter().map(|s| s.dom_nodes).collect();
        let listeners: Vec<f64> = timeline.iter().map(|s| s.listener_count).collect();

        let metrics = LeakGrowthRates {
            heap_bytes: self.estimator.estimate(&heap),
            dom_nodes: self.estimator.estimate(&dom),
            listeners: self.estimator.estimate(&listeners),
        };

        let t = &self.thresholds;
        let triggered: Vec<LeakTrigger> = [
            trigger(LeakType::Memory, metrics.heap_bytes, t.heap_growth_bytes, t.heap_growth_high_bytes),
            trigger(LeakType::Dom, metrics.dom_nodes, t.dom_node_growth, t.dom_node_growth_high),
            trigger(
                LeakType::EventListeners,
                metrics.listeners,
                t.listener_growth,
                t.listener_growth_high,
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        // 置信度最高者胜出，相同置信度保留先出现的类型
        let primary = triggered.iter().fold(None::<&LeakTrigger>, |best, candidate| match best {
            Some(b) if b.confidence >= candidate.confidence => Some(b),
            _ => Some(candidate),
        });

        match primary {
            Some(p) => LeakAnalysisResult {
                leak_detected: true,
                leak_type: p.leak_type,
                confidence: p.confidence,
                triggered: triggered.clone(),
                metrics,
                sample_count,
            },
            None => LeakAnalysisResult {
                leak_detected: false,
                leak_type: LeakType::None,
                confidence: Confidence::Low,
                triggered,
                metrics,
                sample_count,
            },
        }
    }
}

fn trigger(leak_type: LeakType, growth: Option<f64>, threshold: f64, high: f64) -> Option<LeakTrigger> {
    let growth_rate = growth?;
    if growth_rate <= threshold {
        return None;
    }
    let confidence = if growth_rate > high {
        Confidence::High
    } else {
        Confidence::Medium
    };
    Some(LeakTrigger {
        leak_type,
        confidence,
        growth_rate,
        threshold,
    })
}

/// 长时间内存趋势分档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryTrend {
    SignificantGrowth,
    GradualGrowth,
    Decreasing,
    Stable,
}

impl fmt::Display for MemoryTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryTrend::SignificantGrowth => "significant-growth",
            MemoryTrend::GradualGrowth => "gradual-growth",
            MemoryTrend::Decreasing => "decreasing",
            MemoryTrend::Stable => "stable",
        };
        f.write_str(s)
    }
}

/// 稳态内存监控评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTrendAssessment {
    pub trend: MemoryTrend,
    pub total_growth_bytes: f64,
    pub initial_bytes: f64,
    pub final_bytes: f64,
    pub peak_bytes: f64,
    pub average_bytes: f64,
    pub sample_count: usize,
    /// 显著增长视为潜在泄漏
    pub potential_leak: bool,
}

/// 长时间稳态内存监控
pub struct SteadyStateMemoryMonitor {
    thresholds: SteadyStateThresholds,
    estimator: Box<dyn GrowthEstimator>,
}

impl SteadyStateMemoryMonitor {
    pub fn new(thresholds: SteadyStateThresholds) -> Self {
        Self {
            thresholds,
            estimator: estimator_for(MetricCategory::MemoryUsage),
        }
    }

    /// 评估按时间排序的堆大小序列，少于 2 个点返回 `None`
    pub fn assess(&self, heap_used: &[f64]) -> Option<MemoryTrendAssessment> {
        let total_growth = self.estimator.estimate(heap_used)?;
        let t = &self.thresholds;
        let trend = if total_growth > t.total_growth_bytes {
            MemoryTrend::SignificantGrowth
        } else if total_growth > t.sustained_growth_bytes {
            MemoryTrend::GradualGrowth
        } else if total_growth < -t.sustained_growth_bytes {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        };

        let peak = heap_used.iter().copied().fold(f64::MIN, f64::max);
        let average = heap_used.iter().sum::<f64>() / heap_used.len() as f64;

        Some(MemoryTrendAssessment {
            trend,
            total_growth_bytes: total_growth,
            initial_bytes: heap_used[0],
            final_bytes: heap_used[heap_used.len() - 1],
            peak_bytes: peak,
            average_bytes: average,
            sample_count: heap_used.len(),
            potential_leak: trend == MemoryTrend::SignificantGrowth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: f64 = 1024.0 * 1024.0;

    fn heap_only(values: &[f64]) -> Vec<LeakSample> {
        values
            .iter()
            .map(|&heap_used| LeakSample {
                heap_used,
                dom_nodes: 500.0,
                listener_count: 20.0,
            })
            .collect()
    }

    fn classifier() -> LeakClassifier {
        LeakClassifier::new(LeakThresholds::default())
    }

    #[test]
    fn test_flat_heap_is_not_a_leak() {
        let result = classifier().classify(&heap_only(&[10.0 * MB, 10.0 * MB, 10.0 * MB]));
        assert!(!result.leak_detected);
        assert_eq!(result.leak_type, LeakType::None);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.triggered.is_empty());
    }

    #[test]
    fn test_growing_heap_is_memory_leak() {
        let result = classifier().classify(&heap_only(&[10.0 * MB, 40.0 * MB, 90.0 * MB]));
        assert!(result.leak_detected);
        assert_eq!(result.leak_type, LeakType::Memory);
        assert_eq!(result.confidence, Confidence::High);
        assert!((result.metrics.heap_bytes.unwrap() - 55.0 * MB).abs() < 1.0);
    }

    #[test]
    fn test_two_samples_are_insufficient() {
        let result = classifier().classify(&heap_only(&[10.0 * MB, 90.0 * MB]));
        assert!(!result.leak_detected);
        assert_eq!(result.confidence, Confidence::InsufficientData);
        assert_eq!(result.sample_count, 2);
    }

    #[test]
    fn test_medium_confidence_heap_growth() {
        // 增长 100KB：超过 50KB，未超过 200KB
        let kb = 1024.0;
        let result = classifier().classify(&heap_only(&[1000.0 * kb, 1000.0 * kb, 1100.0 * kb, 1100.0 * kb]));
        assert!(result.leak_detected);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_dom_and_listener_triggers() {
        let timeline: Vec<LeakSample> = (0..6)
            .map(|i| LeakSample {
                heap_used: 10.0 * MB,
                dom_nodes: 100.0 + 4.0 * i as f64,
                listener_count: 10.0 + 3.0 * i as f64,
            })
            .collect();
        // dom: [100,104,108] vs [112,116,120] -> 12 (high)
        // listeners: [10,13,16] vs [19,22,25] -> 9 (high)
        let result = classifier().classify(&timeline);
        assert!(result.leak_detected);
        assert_eq!(result.triggered.len(), 2);
        // 同为 high，按固定顺序选择 dom
        assert_eq!(result.leak_type, LeakType::Dom);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_highest_confidence_wins_over_order() {
        let kb = 1024.0;
        let timeline = vec![
            LeakSample { heap_used: 1000.0 * kb, dom_nodes: 100.0, listener_count: 10.0 },
            LeakSample { heap_used: 1000.0 * kb, dom_nodes: 100.0, listener_count: 10.0 },
            LeakSample { heap_used: 1100.0 * kb, dom_nodes: 100.0, listener_count: 20.0 },
            LeakSample { heap_used: 1100.0 * kb, dom_nodes: 100.0, listener_count: 20.0 },
        ];
        // heap: +100KB (medium)，listeners: +10 (high)
        let result = classifier().classify(&timeline);
        assert_eq!(result.triggered.len(), 2);
        assert_eq!(result.leak_type, LeakType::EventListeners);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_steady_state_buckets() {
        let monitor = SteadyStateMemoryMonitor::new(SteadyStateThresholds::default());

        let significant = monitor.assess(&[100.0 * MB, 130.0 * MB, 160.0 * MB]).unwrap();
        assert_eq!(significant.trend, MemoryTrend::SignificantGrowth);
        assert!(significant.potential_leak);
        assert_eq!(significant.peak_bytes, 160.0 * MB);

        let gradual = monitor.assess(&[100.0 * MB, 105.0 * MB, 120.0 * MB]).unwrap();
        assert_eq!(gradual.trend, MemoryTrend::GradualGrowth);
        assert!(!gradual.potential_leak);

        let decreasing = monitor.assess(&[120.0 * MB, 100.0 * MB]).unwrap();
        assert_eq!(decreasing.trend, MemoryTrend::Decreasing);

        let stable = monitor.assess(&[100.0 * MB, 180.0 * MB, 102.0 * MB]).unwrap();
        assert_eq!(stable.trend, MemoryTrend::Stable);
        assert_eq!(stable.total_growth_bytes, 2.0 * MB);

        assert!(monitor.assess(&[100.0 * MB]).is_none());
    }

    #[test]
    fn test_estimator_selection() {
        assert_eq!(estimator_for(MetricCategory::MemoryUsage).name(), "total-delta");
        assert_eq!(estimator_for(MetricCategory::LeakDetection).name(), "mean-split");
    }
}
