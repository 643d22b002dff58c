//! 性能回归监控系统
//!
//! 周期性采集构建与运行时健康指标，与持久化基线比较并分级，跟踪历史
//! 趋势，识别内存泄漏，并生成按优先级排序的优化建议：
//! - 指标探针与读数
//! - 基线存储与回归分析
//! - 趋势与泄漏分析
//! - 报告存储、汇总与通知
//! - 持续监控调度

pub mod aggregator;
pub mod analyzer;
pub mod baseline;
pub mod config;
pub mod error;
pub mod leak;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod report;
pub mod stats;
pub mod trend;

pub use aggregator::{AggregateView, Priority, Recommendation, ReportAggregator};
pub use analyzer::RegressionAnalyzer;
pub use baseline::{BaselineStore, FileBaselineStore, MemoryBaselineStore};
pub use config::{MonitorConfig, ReportFormat, ThresholdMode, Thresholds};
pub use error::{MonitorError, Result};
pub use leak::{LeakAnalysisResult, LeakClassifier, SteadyStateMemoryMonitor};
pub use model::{
    Alert, AlertSeverity, BaselineSnapshot, ComparisonResult, MetricCategory, MetricReading,
    Report, Severity,
};
pub use monitor::{ContinuousMonitor, MonitorState, TickOutcome};
pub use notify::{LogSink, NotificationSink, WebhookSink};
pub use probe::{BrowserHarness, MetricProbe, RawSampleSet};
pub use report::{ReportRenderer, ReportStore};
pub use trend::{TrendAnalyzer, TrendDirection, TrendOutcome, TrendResult};
