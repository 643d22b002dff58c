//! 性能回归监控配置
//!
//! 启动时构造一次的不可变配置。所有字段都有默认值，配置文件中缺失的
//! 字段使用默认值；类别覆盖项按类别默认值逐字段合并。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{MonitorError, Result};
use crate::model::MetricCategory;

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

/// 监控器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 各类别阈值、开关与调度周期
    #[serde(deserialize_with = "deserialize_categories")]
    pub categories: BTreeMap<MetricCategory, CategoryConfig>,
    /// 调度配置
    pub schedule: ScheduleConfig,
    /// 存储路径配置
    pub storage: StorageConfig,
    /// 通知配置
    pub notification: NotificationConfig,
    /// 泄漏检测阈值
    pub leak: LeakThresholds,
    /// 长时间内存监控阈值
    pub steady_state: SteadyStateThresholds,
    /// 探针配置
    pub probes: ProbeConfig,
    /// 报告配置
    pub report: ReportConfig,
}

/// 单个类别的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// 是否启用此类别的探针
    pub enabled: bool,
    /// 阈值
    #[serde(flatten)]
    pub thresholds: Thresholds,
    /// 调度周期（秒），`None` 表示每个 tick 都运行
    pub cadence_secs: Option<u64>,
}

/// 阈值比较方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdMode {
    /// 按 |百分比变化| 比较，上升与下降同等对待
    Percent,
    /// 按分数下降点数比较，只有下降计为回归
    PointsDrop,
}

/// 警告/严重阈值对
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// 警告阈值
    pub warn: f64,
    /// 严重阈值
    pub critical: f64,
    /// 比较方式
    pub mode: ThresholdMode,
}

impl Thresholds {
    pub const fn percent(warn: f64, critical: f64) -> Self {
        Self {
            warn,
            critical,
            mode: ThresholdMode::Percent,
        }
    }

    pub const fn points_drop(warn: f64, critical: f64) -> Self {
        Self {
            warn,
            critical,
            mode: ThresholdMode::PointsDrop,
        }
    }
}

/// 类别默认配置
pub fn default_category_config(category: MetricCategory) -> CategoryConfig {
    let thresholds = match category {
        MetricCategory::BundleSize => Thresholds::percent(10.0, 25.0),
        MetricCategory::LoadTime => Thresholds::percent(15.0, 30.0),
        MetricCategory::MemoryUsage | MetricCategory::LeakDetection => {
            Thresholds::percent(25.0, 50.0)
        }
        MetricCategory::PerformanceTest => Thresholds::points_drop(10.0, 20.0),
    };
    CategoryConfig {
        enabled: true,
        thresholds,
        cadence_secs: None,
    }
}

/// 配置文件中的类别覆盖项
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoryOverride {
    enabled: Option<bool>,
    warn: Option<f64>,
    critical: Option<f64>,
    mode: Option<ThresholdMode>,
    cadence_secs: Option<u64>,
}

impl CategoryOverride {
    fn resolve(self, category: MetricCategory) -> CategoryConfig {
        let mut config = default_category_config(category);
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(warn) = self.warn {
            config.thresholds.warn = warn;
        }
        if let Some(critical) = self.critical {
            config.thresholds.critical = critical;
        }
        if let Some(mode) = self.mode {
            config.thresholds.mode = mode;
        }
        if self.cadence_secs.is_some() {
            config.cadence_secs = self.cadence_secs;
        }
        config
    }
}

fn default_categories() -> BTreeMap<MetricCategory, CategoryConfig> {
    MetricCategory::ALL
        .into_iter()
        .map(|c| (c, default_category_config(c)))
        .collect()
}

fn deserialize_categories<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<MetricCategory, CategoryConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, CategoryOverride>::deserialize(deserializer)?;
    let mut overrides = BTreeMap::new();
    for (tag, category_override) in raw {
        let category = MetricCategory::from_tag(&tag).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown metric category: {}", tag))
        })?;
        overrides.insert(category, category_override);
    }
    Ok(MetricCategory::ALL
        .into_iter()
        .map(|c| (c, overrides.remove(&c).unwrap_or_default().resolve(c)))
        .collect())
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// tick 间隔（秒）
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 基线目录，每个类别一个 JSON 文件
    pub baseline_dir: PathBuf,
    /// 报告目录
    pub reports_dir: PathBuf,
    /// 每个类别保留的最近报告数
    pub max_reports_per_category: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("performance-baselines"),
            reports_dir: PathBuf::from("performance-reports"),
            max_reports_per_category: 50,
        }
    }
}

/// 通知配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook 地址，未配置时只写日志
    pub webhook_url: Option<String>,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// 短时泄漏检测阈值（物理单位，绝对值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakThresholds {
    /// 最少样本数
    pub min_samples: usize,
    /// 堆增长阈值（字节）
    pub heap_growth_bytes: f64,
    /// 堆增长高置信度阈值（字节）
    pub heap_growth_high_bytes: f64,
    /// DOM 节点增长阈值
    pub dom_node_growth: f64,
    /// DOM 节点增长高置信度阈值
    pub dom_node_growth_high: f64,
    /// 事件监听器增长阈值
    pub listener_growth: f64,
    /// 事件监听器增长高置信度阈值
    pub listener_growth_high: f64,
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self {
            min_samples: 3,
            heap_growth_bytes: 50.0 * KB,
            heap_growth_high_bytes: 200.0 * KB,
            dom_node_growth: 5.0,
            dom_node_growth_high: 10.0,
            listener_growth: 2.0,
            listener_growth_high: 5.0,
        }
    }
}

/// 长时间稳态内存监控阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteadyStateThresholds {
    /// 持续增长阈值（字节）
    pub sustained_growth_bytes: f64,
    /// 显著增长阈值（字节）
    pub total_growth_bytes: f64,
}

impl Default for SteadyStateThresholds {
    fn default() -> Self {
        Self {
            sustained_growth_bytes: 10.0 * MB,
            total_growth_bytes: 50.0 * MB,
        }
    }
}

/// 探针配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub artifacts: ArtifactProbeConfig,
    pub load_time: LoadTimeProbeConfig,
    pub memory: HeapProbeConfig,
    pub leak: HeapProbeConfig,
    pub benchmark: CommandProbeConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactProbeConfig::default(),
            load_time: LoadTimeProbeConfig::default(),
            // 长时间稳态监控
            memory: HeapProbeConfig {
                samples: 60,
                settle_ms: 1000,
                ..HeapProbeConfig::default()
            },
            leak: HeapProbeConfig::default(),
            benchmark: CommandProbeConfig::default(),
        }
    }
}

/// 构建产物探针配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactProbeConfig {
    /// 产物目录
    pub dist_dir: PathBuf,
    /// 统计的文件扩展名
    pub extensions: Vec<String>,
}

impl Default for ArtifactProbeConfig {
    fn default() -> Self {
        Self {
            dist_dir: PathBuf::from("dist"),
            extensions: ["js", "mjs", "css", "wasm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 页面加载时间探针配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTimeProbeConfig {
    pub url: String,
    /// 运行次数，每次使用新的浏览器会话
    pub runs: usize,
    /// 两次运行之间的间隔（毫秒）
    pub inter_run_delay_ms: u64,
    /// 导航超时（毫秒）
    pub navigation_timeout_ms: u64,
    /// 导航后等待界面稳定的时间（毫秒）
    pub settle_ms: u64,
}

impl Default for LoadTimeProbeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1420".to_string(),
            runs: 3,
            inter_run_delay_ms: 1000,
            navigation_timeout_ms: 60_000,
            settle_ms: 1500,
        }
    }
}

/// 堆采样探针配置（内存使用与泄漏检测共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapProbeConfig {
    pub url: String,
    /// 采样次数
    pub samples: usize,
    /// 每次操作后等待的时间（毫秒）
    pub settle_ms: u64,
    /// 导航超时（毫秒）
    pub navigation_timeout_ms: u64,
}

impl Default for HeapProbeConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1420".to_string(),
            samples: 10,
            settle_ms: 100,
            navigation_timeout_ms: 60_000,
        }
    }
}

/// 子进程探针配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandProbeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// 超时（秒），超时后终止子进程
    pub timeout_secs: u64,
}

impl Default for CommandProbeConfig {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: vec!["bench".to_string()],
            working_dir: None,
            timeout_secs: 600,
        }
    }
}

/// 报告格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// 文本格式
    #[default]
    Text,
    /// JSON格式
    Json,
    /// Markdown格式
    Markdown,
}

impl std::str::FromStr for ReportFormat {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(MonitorError::Config(format!(
                "unsupported report format: {}",
                other
            ))),
        }
    }
}

/// 报告配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// 汇总报告格式
    pub format: ReportFormat,
    /// 汇总报告输出路径
    pub output_path: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::Markdown,
            output_path: PathBuf::from("performance-summary.md"),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            notification: NotificationConfig::default(),
            leak: LeakThresholds::default(),
            steady_state: SteadyStateThresholds::default(),
            probes: ProbeConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// 从文件加载配置，`.toml` 按 TOML 解析，其余按 JSON 解析
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        for (category, config) in &self.categories {
            let t = &config.thresholds;
            if t.warn < 0.0 || t.critical < 0.0 {
                return Err(MonitorError::Config(format!(
                    "{}: thresholds must be non-negative",
                    category
                )));
            }
            if t.warn > t.critical {
                return Err(MonitorError::Config(format!(
                    "{}: warn threshold {} exceeds critical threshold {}",
                    category, t.warn, t.critical
                )));
            }
            if config.cadence_secs == Some(0) {
                return Err(MonitorError::Config(format!(
                    "{}: cadence must be positive",
                    category
                )));
            }
        }
        if self.schedule.interval_secs == 0 {
            return Err(MonitorError::Config(
                "schedule interval must be positive".to_string(),
            ));
        }
        if self.storage.max_reports_per_category == 0 {
            return Err(MonitorError::Config(
                "max_reports_per_category must be at least 1".to_string(),
            ));
        }
        if self.probes.load_time.runs == 0 {
            return Err(MonitorError::Config(
                "load-time probe needs at least one run".to_string(),
            ));
        }
        for (name, heap) in [("memory", &self.probes.memory), ("leak", &self.probes.leak)] {
            if heap.samples == 0 {
                return Err(MonitorError::Config(format!(
                    "{} probe needs at least one heap sample",
                    name
                )));
            }
        }
        Ok(())
    }

    /// 类别配置
    pub fn category(&self, category: MetricCategory) -> CategoryConfig {
        self.categories
            .get(&category)
            .cloned()
            .unwrap_or_else(|| default_category_config(category))
    }

    /// 已启用的类别，按执行顺序
    pub fn enabled_categories(&self) -> Vec<MetricCategory> {
        MetricCategory::ALL
            .into_iter()
            .filter(|c| self.category(*c).enabled)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = MonitorConfig::default();
        let bundle = config.category(MetricCategory::BundleSize).thresholds;
        assert_eq!((bundle.warn, bundle.critical), (10.0, 25.0));
        let load = config.category(MetricCategory::LoadTime).thresholds;
        assert_eq!((load.warn, load.critical), (15.0, 30.0));
        let memory = config.category(MetricCategory::MemoryUsage).thresholds;
        assert_eq!((memory.warn, memory.critical), (25.0, 50.0));
        let perf = config.category(MetricCategory::PerformanceTest).thresholds;
        assert_eq!(perf.mode, ThresholdMode::PointsDrop);
        assert_eq!((perf.warn, perf.critical), (10.0, 20.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: MonitorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_partial_category_override_keeps_other_fields() {
        let json = r#"{ "categories": { "load-time": { "warn": 5.0 } } }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        let load = config.category(MetricCategory::LoadTime);
        assert_eq!(load.thresholds.warn, 5.0);
        assert_eq!(load.thresholds.critical, 30.0);
        assert!(load.enabled);
        // 其他类别保持默认
        assert_eq!(
            config.category(MetricCategory::BundleSize),
            default_category_config(MetricCategory::BundleSize)
        );
    }

    #[test]
    fn test_disable_category() {
        let json = r#"{ "categories": { "memory-leak": { "enabled": false } } }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        let enabled = config.enabled_categories();
        assert!(!enabled.contains(&MetricCategory::LeakDetection));
        assert_eq!(enabled.len(), 4);
    }

    #[test]
    fn test_toml_config() {
        let toml_str = r#"
            [schedule]
            interval_secs = 60

            [categories.bundle-size]
            critical = 40.0
            cadence_secs = 600

            [notification]
            webhook_url = "https://hooks.example.com/perf"
        "#;
        let config: MonitorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.schedule.interval_secs, 60);
        let bundle = config.category(MetricCategory::BundleSize);
        assert_eq!(bundle.thresholds.critical, 40.0);
        assert_eq!(bundle.thresholds.warn, 10.0);
        assert_eq!(bundle.cadence_secs, Some(600));
        assert_eq!(
            config.notification.webhook_url.as_deref(),
            Some("https://hooks.example.com/perf")
        );
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let json = r#"{ "categories": { "cpu": { "warn": 1.0 } } }"#;
        assert!(serde_json::from_str::<MonitorConfig>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let json = r#"{ "categories": { "bundle-size": { "warn": 30.0, "critical": 20.0 } } }"#;
        let config: MonitorConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_heap_samples() {
        let mut config = MonitorConfig::default();
        config.probes.memory.samples = 0;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let mut config = MonitorConfig::default();
        config.probes.leak.samples = 0;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_from_file_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, r#"{ "storage": { "max_reports_per_category": 5 } }"#)?;
        let config = MonitorConfig::from_file(&path)?;
        assert_eq!(config.storage.max_reports_per_category, 5);
        assert_eq!(config.storage.reports_dir, PathBuf::from("performance-reports"));
        Ok(())
    }

    #[test]
    fn test_report_format_parse() {
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!("html".parse::<ReportFormat>().is_err());
    }
}
