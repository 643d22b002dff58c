//! 指标探针
//!
//! 探针是外部协作者的适配层：流水线只依赖 [`MetricProbe::run`] 返回的
//! 类型化 [`RawSampleSet`]，不关心采集细节。浏览器自动化本身通过
//! [`BrowserHarness`] 注入，不在本 crate 内实现。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ArtifactProbeConfig, CommandProbeConfig, HeapProbeConfig, LoadTimeProbeConfig, MonitorConfig};
use crate::error::{MonitorError, Result};
use crate::leak::LeakSample;
use crate::model::{MetricCategory, MetricReading, MetricUnit};

/// 子进程超时时返回的错误信息
pub const TIMEOUT_EXCEEDED: &str = "Timeout exceeded";

/// 探针没有产生任何采样时的错误信息
pub const NO_SAMPLES: &str = "no samples collected";

/// 单个构建产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// 相对产物目录的路径，使用 '/' 分隔
    pub path: String,
    pub bytes: u64,
}

/// 一次页面导航的计时（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub ttfb_ms: f64,
    pub dom_content_loaded_ms: f64,
    pub load_complete_ms: f64,
    pub first_paint_ms: Option<f64>,
    pub first_contentful_paint_ms: Option<f64>,
}

/// 堆采样点
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapSample {
    /// 距离首个采样的时间（毫秒）
    pub elapsed_ms: u64,
    pub heap_used: f64,
    pub heap_total: f64,
    pub dom_nodes: f64,
    pub listener_count: f64,
}

impl HeapSample {
    pub fn leak_sample(&self) -> LeakSample {
        LeakSample {
            heap_used: self.heap_used,
            dom_nodes: self.dom_nodes,
            listener_count: self.listener_count,
        }
    }
}

/// 子进程基准测试结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: f64,
    /// 从标准输出解析的 `score=<n>`
    pub score: Option<f64>,
    pub error: Option<String>,
}

impl BenchmarkOutcome {
    /// 性能分数：优先使用输出中的分数，否则成功记 100 分
    pub fn effective_score(&self) -> f64 {
        self.score.unwrap_or(100.0)
    }
}

/// 探针的类型化输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum RawSampleSet {
    Artifacts(Vec<ArtifactEntry>),
    Navigation(Vec<NavigationTiming>),
    HeapTimeline(Vec<HeapSample>),
    Benchmark(BenchmarkOutcome),
}

impl RawSampleSet {
    /// 采集成功但结果本身表示失败（如子进程超时、退出码非 0 或没有任何采样）
    ///
    /// 空采样集不能当作一次有效运行，否则会用空快照覆盖已有基线。
    pub fn failure(&self) -> Option<String> {
        match self {
            RawSampleSet::Benchmark(outcome) if !outcome.success => Some(
                outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("exit code {:?}", outcome.exit_code)),
            ),
            RawSampleSet::Artifacts(entries) if entries.is_empty() => Some(NO_SAMPLES.to_string()),
            RawSampleSet::Navigation(runs) if runs.is_empty() => Some(NO_SAMPLES.to_string()),
            RawSampleSet::HeapTimeline(samples) if samples.is_empty() => Some(NO_SAMPLES.to_string()),
            _ => None,
        }
    }

    /// 堆时间线，非堆采样返回空切片
    pub fn heap_timeline(&self) -> &[HeapSample] {
        match self {
            RawSampleSet::HeapTimeline(samples) => samples,
            _ => &[],
        }
    }

    /// 转换为读数，保持采样顺序
    pub fn into_readings(self, category: MetricCategory, timestamp: DateTime<Utc>) -> Vec<MetricReading> {
        let reading = |name: &str, value: f64, unit: MetricUnit| {
            MetricReading::new(category, name, value, unit, timestamp)
        };
        match self {
            RawSampleSet::Artifacts(entries) => {
                let total: u64 = entries.iter().map(|e| e.bytes).sum();
                let mut readings: Vec<MetricReading> = entries
                    .iter()
                    .map(|e| reading(&e.path, e.bytes as f64, MetricUnit::Bytes))
                    .collect();
                // 只比较字节数；产物个数随代码拆分变化，不参与阈值判断
                readings.push(reading("total_size", total as f64, MetricUnit::Bytes));
                readings
            }
            RawSampleSet::Navigation(runs) => {
                let mut readings = Vec::new();
                for run in runs {
                    readings.push(reading("ttfb_ms", run.ttfb_ms, MetricUnit::Milliseconds));
                    readings.push(reading(
                        "dom_content_loaded_ms",
                        run.dom_content_loaded_ms,
                        MetricUnit::Milliseconds,
                    ));
                    readings.push(reading("load_complete_ms", run.load_complete_ms, MetricUnit::Milliseconds));
                    if let Some(fp) = run.first_paint_ms {
                        readings.push(reading("first_paint_ms", fp, MetricUnit::Milliseconds));
                    }
                    if let Some(fcp) = run.first_contentful_paint_ms {
                        readings.push(reading("first_contentful_paint_ms", fcp, MetricUnit::Milliseconds));
                    }
                }
                readings
            }
            RawSampleSet::HeapTimeline(samples) => heap_readings(&samples)
                .into_iter()
                .map(|(name, value, unit)| reading(name, value, unit))
                .collect(),
            RawSampleSet::Benchmark(outcome) => {
                vec![reading("score", outcome.effective_score(), MetricUnit::Points)]
            }
        }
    }
}

/// 堆时间线的汇总读数：起止、峰值、平均值以及最终的 DOM 与监听器数量
fn heap_readings(samples: &[HeapSample]) -> Vec<(&'static str, f64, MetricUnit)> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    let peak = samples.iter().map(|s| s.heap_used).fold(f64::MIN, f64::max);
    let average = samples.iter().map(|s| s.heap_used).sum::<f64>() / samples.len() as f64;
    vec![
        ("initial_heap_bytes", first.heap_used, MetricUnit::Bytes),
        ("peak_heap_bytes", peak, MetricUnit::Bytes),
        ("final_heap_bytes", last.heap_used, MetricUnit::Bytes),
        ("average_heap_bytes", average, MetricUnit::Bytes),
        ("dom_nodes", last.dom_nodes, MetricUnit::Count),
        ("listener_count", last.listener_count, MetricUnit::Count),
    ]
}

/// 指标探针接口
#[async_trait]
pub trait MetricProbe: Send + Sync {
    /// 探针负责的类别
    fn category(&self) -> MetricCategory;

    /// 执行一次采集
    async fn run(&self) -> Result<RawSampleSet>;
}

// ============================================================================
// 构建产物大小
// ============================================================================

/// 递归统计产物目录中指定扩展名的文件大小
#[derive(Debug, Clone)]
pub struct ArtifactSizeProbe {
    dist_dir: PathBuf,
    extensions: Vec<String>,
}

impl ArtifactSizeProbe {
    pub fn new(config: &ArtifactProbeConfig) -> Self {
        Self {
            dist_dir: config.dist_dir.clone(),
            extensions: config.extensions.clone(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
    }
}

#[async_trait]
impl MetricProbe for ArtifactSizeProbe {
    fn category(&self) -> MetricCategory {
        MetricCategory::BundleSize
    }

    async fn run(&self) -> Result<RawSampleSet> {
        if !tokio::fs::try_exists(&self.dist_dir).await? {
            return Err(MonitorError::probe(
                self.category(),
                format!("artifact directory {} not found", self.dist_dir.display()),
            ));
        }

        let mut entries = Vec::new();
        let mut pending = vec![self.dist_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && self.matches(&path) {
                    let bytes = entry.metadata().await?.len();
                    entries.push(ArtifactEntry {
                        path: relative_name(&self.dist_dir, &path),
                        bytes,
                    });
                }
            }
        }
        // 目录遍历顺序与平台有关
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("Found {} artifacts in {}", entries.len(), self.dist_dir.display());
        Ok(RawSampleSet::Artifacts(entries))
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// 子进程基准测试
// ============================================================================

/// 运行外部命令并记录退出状态、耗时与分数
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(config: &CommandProbeConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MetricProbe for CommandProbe {
    fn category(&self) -> MetricCategory {
        MetricCategory::PerformanceTest
    }

    async fn run(&self) -> Result<RawSampleSet> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // 超时后 future 被丢弃，子进程随之被终止
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!("Running {} {}", self.program, self.args.join(" "));
        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| {
            MonitorError::probe(self.category(), format!("failed to spawn {}: {}", self.program, e))
        })?;

        let outcome = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let success = output.status.success();
                BenchmarkOutcome {
                    success,
                    exit_code: output.status.code(),
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                    score: parse_score(&stdout),
                    error: (!success).then(|| {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        stderr.lines().last().unwrap_or("command failed").to_string()
                    }),
                }
            }
            Err(_) => {
                tracing::warn!("{} killed after {:?}", self.program, self.timeout);
                BenchmarkOutcome {
                    success: false,
                    exit_code: None,
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                    score: None,
                    error: Some(TIMEOUT_EXCEEDED.to_string()),
                }
            }
        };
        Ok(RawSampleSet::Benchmark(outcome))
    }
}

/// 解析标准输出中最后一个 `score=<n>`
pub fn parse_score(stdout: &str) -> Option<f64> {
    stdout
        .split_whitespace()
        .filter_map(|token| token.strip_prefix("score="))
        .filter_map(|value| value.trim_end_matches([',', ';']).parse::<f64>().ok())
        .last()
}

// ============================================================================
// 浏览器探针
// ============================================================================

/// 浏览器自动化会话
#[async_trait]
pub trait BrowserSession: Send {
    /// 导航到页面并返回计时
    async fn navigate(&mut self, url: &str) -> Result<NavigationTiming>;

    /// 读取当前堆与 DOM 状态
    async fn sample(&mut self) -> Result<HeapSample>;

    /// 执行一次界面操作（打开/关闭面板等），用于泄漏检测
    async fn exercise(&mut self) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// 浏览器自动化工具，每次调用启动一个新的浏览器实例
#[async_trait]
pub trait BrowserHarness: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

async fn navigate_with_timeout(
    session: &mut dyn BrowserSession,
    url: &str,
    limit: Duration,
) -> Result<NavigationTiming> {
    match tokio::time::timeout(limit, session.navigate(url)).await {
        Ok(timing) => timing,
        Err(_) => {
            tracing::warn!("Navigation to {} did not finish in time", url);
            Err(MonitorError::Timeout(limit.as_millis() as u64))
        }
    }
}

/// 页面加载时间探针
pub struct LoadTimeProbe {
    config: LoadTimeProbeConfig,
    harness: Arc<dyn BrowserHarness>,
}

impl LoadTimeProbe {
    pub fn new(config: LoadTimeProbeConfig, harness: Arc<dyn BrowserHarness>) -> Self {
        Self { config, harness }
    }

    async fn single_run(&self) -> Result<NavigationTiming> {
        let mut session = self.harness.launch().await?;
        let result = navigate_with_timeout(
            session.as_mut(),
            &self.config.url,
            Duration::from_millis(self.config.navigation_timeout_ms),
        )
        .await;
        if result.is_ok() {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
        // 无论导航是否成功都关闭浏览器
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close browser session: {}", e);
        }
        result
    }
}

#[async_trait]
impl MetricProbe for LoadTimeProbe {
    fn category(&self) -> MetricCategory {
        MetricCategory::LoadTime
    }

    async fn run(&self) -> Result<RawSampleSet> {
        let mut runs = Vec::with_capacity(self.config.runs);
        for i in 0..self.config.runs {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_run_delay_ms)).await;
            }
            let timing = self.single_run().await?;
            tracing::debug!("Load run {}/{}: {:.0} ms", i + 1, self.config.runs, timing.load_complete_ms);
            runs.push(timing);
        }
        Ok(RawSampleSet::Navigation(runs))
    }
}

/// 堆时间线探针，内存使用与泄漏检测共用
pub struct HeapTimelineProbe {
    category: MetricCategory,
    config: HeapProbeConfig,
    harness: Arc<dyn BrowserHarness>,
}

impl HeapTimelineProbe {
    pub fn new(category: MetricCategory, config: HeapProbeConfig, harness: Arc<dyn BrowserHarness>) -> Self {
        Self {
            category,
            config,
            harness,
        }
    }

    async fn collect(&self, session: &mut dyn BrowserSession) -> Result<Vec<HeapSample>> {
        navigate_with_timeout(
            session,
            &self.config.url,
            Duration::from_millis(self.config.navigation_timeout_ms),
        )
        .await?;
        let settle = Duration::from_millis(self.config.settle_ms);
        tokio::time::sleep(settle).await;

        let start = Instant::now();
        let mut samples = Vec::with_capacity(self.config.samples);
        for i in 0..self.config.samples {
            let mut sample = session.sample().await?;
            sample.elapsed_ms = start.elapsed().as_millis() as u64;
            samples.push(sample);
            if i + 1 < self.config.samples {
                if self.category == MetricCategory::LeakDetection {
                    session.exercise().await?;
                }
                tokio::time::sleep(settle).await;
            }
        }
        Ok(samples)
    }
}

#[async_trait]
impl MetricProbe for HeapTimelineProbe {
    fn category(&self) -> MetricCategory {
        self.category
    }

    async fn run(&self) -> Result<RawSampleSet> {
        let mut session = self.harness.launch().await?;
        let result = self.collect(session.as_mut()).await;
        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close browser session: {}", e);
        }
        Ok(RawSampleSet::HeapTimeline(result?))
    }
}

/// 按配置构建已启用类别的探针
///
/// 浏览器类探针需要注入 [`BrowserHarness`]，未提供时跳过并记录警告。
pub fn build_probes(
    config: &MonitorConfig,
    harness: Option<Arc<dyn BrowserHarness>>,
) -> Vec<Box<dyn MetricProbe>> {
    let mut probes: Vec<Box<dyn MetricProbe>> = Vec::new();
    for category in config.enabled_categories() {
        match category {
            MetricCategory::BundleSize => {
                probes.push(Box::new(ArtifactSizeProbe::new(&config.probes.artifacts)));
            }
            MetricCategory::PerformanceTest => {
                probes.push(Box::new(CommandProbe::new(&config.probes.benchmark)));
            }
            browser_category => {
                let Some(harness) = harness.clone() else {
                    tracing::warn!("No browser harness available, skipping {} probe", browser_category);
                    continue;
                };
                let probe: Box<dyn MetricProbe> = match browser_category {
                    MetricCategory::LoadTime => {
                        Box::new(LoadTimeProbe::new(config.probes.load_time.clone(), harness))
                    }
                    MetricCategory::MemoryUsage => Box::new(HeapTimelineProbe::new(
                        MetricCategory::MemoryUsage,
                        config.probes.memory.clone(),
                        harness,
                    )),
                    _ => Box::new(HeapTimelineProbe::new(
                        MetricCategory::LeakDetection,
                        config.probes.leak.clone(),
                        harness,
                    )),
                };
                probes.push(probe);
            }
        }
    }
    probes
}
