//! 持续监控
//!
//! 每个 tick 顺序运行已启用且到期的探针，将读数与基线比较，写入报告并
//! 收集告警。只有本次 tick 没有任何严重告警时才整体更新被触及类别的
//! 基线，避免回归期间基线被逐步抬高。
//!
//! 状态转换：`Idle -> Running{category} -> Collected -> Idle`。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::{RegressionAnalyzer, aggregate_readings, run_statistics};
use crate::baseline::BaselineStore;
use crate::config::MonitorConfig;
use crate::leak::{LeakClassifier, LeakSample, MemoryTrend, SteadyStateMemoryMonitor};
use crate::model::{Alert, BaselineSnapshot, MetricCategory, Report};
use crate::notify::{NotificationSink, dispatch};
use crate::probe::{MetricProbe, RawSampleSet};
use crate::report::ReportStore;

/// 监控器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum MonitorState {
    Idle,
    Running { category: MetricCategory },
    Collected,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "idle"),
            MonitorState::Running { category } => write!(f, "running({})", category),
            MonitorState::Collected => write!(f, "collected"),
        }
    }
}

/// 一次 tick 的结果
#[derive(Debug, Clone, Serialize)]
pub struct TickOutcome {
    pub started_at: DateTime<Utc>,
    pub reports: Vec<Report>,
    pub alerts: Vec<Alert>,
    /// 探针失败的类别
    pub failed: Vec<MetricCategory>,
    /// 调度周期未到而跳过的类别
    pub skipped: Vec<MetricCategory>,
    pub baseline_updated: bool,
    /// 告警是否成功送达，不影响退出码
    pub notified: bool,
}

impl TickOutcome {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            reports: Vec::new(),
            alerts: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            baseline_updated: false,
            notified: true,
        }
    }

    pub fn critical_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.is_critical()).count()
    }

    pub fn has_critical(&self) -> bool {
        self.critical_count() > 0
    }

    /// 进程退出码：有严重回归或检测到泄漏时为 1
    pub fn exit_code(&self) -> i32 {
        if self.has_critical() { 1 } else { 0 }
    }
}

/// 持续监控器
pub struct ContinuousMonitor {
    config: MonitorConfig,
    analyzer: RegressionAnalyzer,
    leak_classifier: LeakClassifier,
    steady_state: SteadyStateMemoryMonitor,
    store: Box<dyn BaselineStore>,
    /// 启动时读取一次，之后只由本监控器写入
    baselines: BTreeMap<MetricCategory, BaselineSnapshot>,
    reports: ReportStore,
    probes: Vec<Box<dyn MetricProbe>>,
    sink: Box<dyn NotificationSink>,
    state: MonitorState,
    last_run: BTreeMap<MetricCategory, DateTime<Utc>>,
    /// 已完成 tick 中最差的退出码
    worst_exit_code: i32,
}

impl ContinuousMonitor {
    pub fn new(
        config: MonitorConfig,
        store: Box<dyn BaselineStore>,
        reports: ReportStore,
        sink: Box<dyn NotificationSink>,
    ) -> Self {
        let baselines = MetricCategory::ALL
            .into_iter()
            .map(|c| (c, store.load(c)))
            .collect();
        Self {
            analyzer: RegressionAnalyzer::new(&config),
            leak_classifier: LeakClassifier::new(config.leak.clone()),
            steady_state: SteadyStateMemoryMonitor::new(config.steady_state.clone()),
            config,
            store,
            baselines,
            reports,
            probes: Vec::new(),
            sink,
            state: MonitorState::Idle,
            last_run: BTreeMap::new(),
            worst_exit_code: 0,
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn MetricProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_probes(mut self, probes: Vec<Box<dyn MetricProbe>>) -> Self {
        self.probes.extend(probes);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// 到目前为止所有已完成 tick 中最差的退出码，调度被中断时使用
    pub fn worst_exit_code(&self) -> i32 {
        self.worst_exit_code
    }

    /// 当前生效的类别基线
    pub fn baseline(&self, category: MetricCategory) -> Option<&BaselineSnapshot> {
        self.baselines.get(&category)
    }

    /// 类别在 `now` 时是否到期
    fn is_due(&self, category: MetricCategory, now: DateTime<Utc>) -> bool {
        let Some(cadence) = self.config.category(category).cadence_secs else {
            return true;
        };
        match self.last_run.get(&category) {
            Some(last) => (now - *last).num_seconds() >= cadence as i64,
            None => true,
        }
    }

    /// 执行一次 tick
    pub async fn run_tick(&mut self) -> TickOutcome {
        self.run_tick_at(Utc::now()).await
    }

    /// 以指定时间执行一次 tick
    pub async fn run_tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome::new(now);
        let mut touched: Vec<(MetricCategory, BTreeMap<String, f64>)> = Vec::new();

        for probe in &self.probes {
            let category = probe.category();
            if !self.config.category(category).enabled {
                continue;
            }
            if !self.is_due(category, now) {
                tracing::debug!("{} not due yet, skipping", category);
                outcome.skipped.push(category);
                continue;
            }

            self.state = MonitorState::Running { category };
            tracing::info!("Running {} probe", category);
            let samples = match probe.run().await {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::error!("{} probe failed: {}", category, e);
                    outcome.alerts.push(Alert::probe_failure(category, &e.to_string()));
                    outcome.failed.push(category);
                    continue;
                }
            };
            if let Some(error) = samples.failure() {
                tracing::error!("{} probe failed: {}", category, error);
                outcome.alerts.push(Alert::probe_failure(category, &error));
                outcome.failed.push(category);
                continue;
            }
            self.last_run.insert(category, now);

            let baseline = self
                .baselines
                .get(&category)
                .cloned()
                .unwrap_or_else(|| BaselineSnapshot::empty(category));
            let (report, alerts) = evaluate(
                &self.analyzer,
                &self.leak_classifier,
                &self.steady_state,
                category,
                samples,
                &baseline,
                now,
            );
            log_report(&report);

            if let Err(e) = self.reports.write(&report) {
                tracing::error!("Failed to write {} report: {}", category, e);
            }
            touched.push((category, aggregate_readings(&report.readings)));
            outcome.alerts.extend(alerts);
            outcome.reports.push(report);
        }

        self.state = MonitorState::Collected;
        outcome.baseline_updated = self.update_baselines(&outcome, touched, now);
        outcome.notified = dispatch(self.sink.as_ref(), &outcome.alerts).await;

        tracing::info!(
            "Tick finished: {} reports, {} alerts ({} critical), {} failed probes",
            outcome.reports.len(),
            outcome.alerts.len(),
            outcome.critical_count(),
            outcome.failed.len()
        );
        self.state = MonitorState::Idle;
        self.worst_exit_code = self.worst_exit_code.max(outcome.exit_code());
        outcome
    }

    /// 无严重告警时整体覆盖被触及类别的基线
    fn update_baselines(
        &mut self,
        outcome: &TickOutcome,
        touched: Vec<(MetricCategory, BTreeMap<String, f64>)>,
        now: DateTime<Utc>,
    ) -> bool {
        if touched.is_empty() {
            return false;
        }
        let critical = outcome.critical_count();
        if critical > 0 {
            tracing::warn!(
                "{} critical alert(s) raised; baseline NOT updated for {}",
                critical,
                touched
                    .iter()
                    .map(|(c, _)| c.tag())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return false;
        }

        let mut all_saved = true;
        for (category, values) in touched {
            let snapshot = BaselineSnapshot::from_values(category, values, now);
            match self.store.save(category, &snapshot) {
                Ok(()) => {
                    tracing::info!("Baseline updated for {}", category);
                    self.baselines.insert(category, snapshot);
                }
                Err(e) => {
                    tracing::error!("Failed to save {} baseline: {}", category, e);
                    all_saved = false;
                }
            }
        }
        all_saved
    }

    /// 按配置的间隔持续运行；`max_ticks` 为 `None` 时不退出
    ///
    /// 返回所有 tick 中最差的退出码。
    pub async fn run_schedule(&mut self, max_ticks: Option<usize>) -> i32 {
        let period = Duration::from_secs(self.config.schedule.interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut worst = 0;
        let mut ticks = 0;
        loop {
            interval.tick().await;
            let outcome = self.run_tick().await;
            worst = worst.max(outcome.exit_code());
            ticks += 1;
            if max_ticks.is_some_and(|max| ticks >= max) {
                return worst;
            }
            tracing::info!("Next tick in {} s", period.as_secs());
        }
    }
}

/// 将一次探针输出转换为报告与告警
fn evaluate(
    analyzer: &RegressionAnalyzer,
    leak_classifier: &LeakClassifier,
    steady_state: &SteadyStateMemoryMonitor,
    category: MetricCategory,
    samples: RawSampleSet,
    baseline: &BaselineSnapshot,
    now: DateTime<Utc>,
) -> (Report, Vec<Alert>) {
    let heap = samples.heap_timeline().to_vec();
    let readings = samples.into_readings(category, now);

    if baseline.is_empty() {
        tracing::info!("No baseline for {}, this run establishes one", category);
    }
    let comparisons = analyzer.compare_readings(category, &readings, baseline);
    let mut alerts: Vec<Alert> = comparisons
        .iter()
        .filter_map(|c| Alert::regression(category, c))
        .collect();

    let mut report = Report::new(category, now, readings, comparisons);
    report.statistics = run_statistics(&report.readings);

    match category {
        MetricCategory::LeakDetection => {
            let timeline: Vec<LeakSample> = heap.iter().map(|s| s.leak_sample()).collect();
            let verdict = leak_classifier.classify(&timeline);
            if verdict.leak_detected {
                alerts.push(Alert::leak(&verdict));
            }
            report.leak = Some(verdict);
        }
        MetricCategory::MemoryUsage => {
            let series: Vec<f64> = heap.iter().map(|s| s.heap_used).collect();
            if let Some(assessment) = steady_state.assess(&series) {
                if assessment.trend == MemoryTrend::SignificantGrowth {
                    alerts.push(Alert::memory_growth(&assessment));
                }
                report.memory_trend = Some(assessment);
            }
        }
        _ => {}
    }
    (report, alerts)
}

fn log_report(report: &Report) {
    for c in &report.comparisons {
        if let Some(pct) = c.percent_change
            && pct != 0.0
        {
            tracing::debug!("{} {}: {:+.2}% ({})", report.category, c.metric, pct, c.severity);
        }
    }
    if report.summary.has_issues() {
        tracing::warn!(
            "{}: {} warnings, {} critical",
            report.category,
            report.summary.warnings,
            report.summary.errors
        );
    } else {
        tracing::info!(
            "{}: no regressions ({} new metrics)",
            report.category,
            report.summary.new_metrics
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use crate::baseline::MemoryBaselineStore;
    use crate::error::{MonitorError, Result};
    use crate::notify::LogSink;
    use crate::probe::{ArtifactEntry, HeapSample};

    struct FixedProbe {
        category: MetricCategory,
        samples: Option<RawSampleSet>,
        runs: Arc<AtomicUsize>,
    }

    impl FixedProbe {
        fn new(category: MetricCategory, samples: Option<RawSampleSet>) -> Self {
            Self {
                category,
                samples,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl MetricProbe for FixedProbe {
        fn category(&self) -> MetricCategory {
            self.category
        }

        async fn run(&self) -> Result<RawSampleSet> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.samples
                .clone()
                .ok_or_else(|| MonitorError::probe(self.category, "probe exploded"))
        }
    }

    fn artifacts(main_js: u64) -> RawSampleSet {
        RawSampleSet::Artifacts(vec![ArtifactEntry {
            path: "main.js".to_string(),
            bytes: main_js,
        }])
    }

    fn heap(values: &[f64]) -> RawSampleSet {
        RawSampleSet::HeapTimeline(
            values
                .iter()
                .map(|&heap_used| HeapSample {
                    heap_used,
                    dom_nodes: 100.0,
                    listener_count: 10.0,
                    ..HeapSample::default()
                })
                .collect(),
        )
    }

    fn monitor(store: MemoryBaselineStore, dir: &std::path::Path) -> ContinuousMonitor {
        ContinuousMonitor::new(
            MonitorConfig::default(),
            Box::new(store),
            ReportStore::new(dir, 10),
            Box::new(LogSink),
        )
    }

    fn bundle_baseline(main_js: f64) -> BaselineSnapshot {
        let values = [("main.js".to_string(), main_js)].into_iter().collect();
        BaselineSnapshot::from_values(MetricCategory::BundleSize, values, Utc::now())
    }

    #[tokio::test]
    async fn test_first_run_establishes_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(MemoryBaselineStore::new(), dir.path())
            .with_probe(Box::new(FixedProbe::new(MetricCategory::BundleSize, Some(artifacts(1000)))));

        let outcome = monitor.run_tick().await;
        assert!(outcome.baseline_updated);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(monitor.state(), MonitorState::Idle);
        let baseline = monitor.baseline(MetricCategory::BundleSize).unwrap();
        assert_eq!(baseline.get("main.js"), Some(1000.0));
        assert_eq!(baseline.get("total_size"), Some(1000.0));
    }

    #[tokio::test]
    async fn test_critical_regression_blocks_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryBaselineStore::new().with_snapshot(bundle_baseline(100.0 * 1024.0));
        let mut monitor = monitor(store, dir.path()).with_probe(Box::new(FixedProbe::new(
            MetricCategory::BundleSize,
            Some(artifacts(135 * 1024)),
        )));

        let outcome = monitor.run_tick().await;
        assert!(!outcome.baseline_updated);
        assert_eq!(outcome.exit_code(), 1);
        assert!(outcome.alerts.iter().any(|a| a.alert_type == "bundle-size-regression"));
        assert_eq!(
            monitor.baseline(MetricCategory::BundleSize).unwrap().get("main.js"),
            Some(100.0 * 1024.0)
        );
    }

    #[tokio::test]
    async fn test_worst_exit_code_survives_clean_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryBaselineStore::new().with_snapshot(bundle_baseline(100.0 * 1024.0));
        let mut monitor = monitor(store, dir.path()).with_probe(Box::new(FixedProbe::new(
            MetricCategory::BundleSize,
            Some(artifacts(135 * 1024)),
        )));
        assert_eq!(monitor.worst_exit_code(), 0);

        assert_eq!(monitor.run_tick().await.exit_code(), 1);
        assert_eq!(monitor.worst_exit_code(), 1);

        // 回落到基线水平后 tick 本身正常，但最差退出码保留
        monitor.probes = vec![Box::new(FixedProbe::new(
            MetricCategory::BundleSize,
            Some(artifacts(100 * 1024)),
        ))];
        assert_eq!(monitor.run_tick().await.exit_code(), 0);
        assert_eq!(monitor.worst_exit_code(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_does_not_abort_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(MemoryBaselineStore::new(), dir.path())
            .with_probe(Box::new(FixedProbe::new(MetricCategory::LoadTime, None)))
            .with_probe(Box::new(FixedProbe::new(MetricCategory::BundleSize, Some(artifacts(10)))));

        let outcome = monitor.run_tick().await;
        assert_eq!(outcome.failed, vec![MetricCategory::LoadTime]);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.alerts[0].alert_type, "load-time-failure");
        // 探针失败不是严重告警
        assert!(outcome.baseline_updated);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_empty_heap_timeline_keeps_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let values = [("peak_heap_bytes".to_string(), 1e8)].into_iter().collect();
        let store = MemoryBaselineStore::new().with_snapshot(BaselineSnapshot::from_values(
            MetricCategory::MemoryUsage,
            values,
            Utc::now(),
        ));
        let mut monitor = monitor(store, dir.path())
            .with_probe(Box::new(FixedProbe::new(MetricCategory::MemoryUsage, Some(heap(&[])))));

        let outcome = monitor.run_tick().await;
        assert_eq!(outcome.failed, vec![MetricCategory::MemoryUsage]);
        assert_eq!(outcome.alerts[0].alert_type, "memory-usage-failure");
        assert!(outcome.reports.is_empty());
        assert!(!outcome.baseline_updated);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(
            monitor.baseline(MetricCategory::MemoryUsage).unwrap().get("peak_heap_bytes"),
            Some(1e8)
        );
    }

    #[tokio::test]
    async fn test_leak_verdict_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        const MB: f64 = 1024.0 * 1024.0;
        let mut monitor = monitor(MemoryBaselineStore::new(), dir.path()).with_probe(Box::new(
            FixedProbe::new(MetricCategory::LeakDetection, Some(heap(&[10.0 * MB, 40.0 * MB, 90.0 * MB]))),
        ));

        let outcome = monitor.run_tick().await;
        assert_eq!(outcome.exit_code(), 1);
        assert!(!outcome.baseline_updated);
        let verdict = outcome.reports[0].leak.as_ref().unwrap();
        assert!(verdict.leak_detected);
        assert!(outcome.alerts.iter().any(|a| a.alert_type == "memory-leak"));
    }

    #[tokio::test]
    async fn test_memory_usage_attaches_trend() {
        let dir = tempfile::tempdir().unwrap();
        const MB: f64 = 1024.0 * 1024.0;
        let mut monitor = monitor(MemoryBaselineStore::new(), dir.path()).with_probe(Box::new(
            FixedProbe::new(MetricCategory::MemoryUsage, Some(heap(&[100.0 * MB, 130.0 * MB, 160.0 * MB]))),
        ));

        let outcome = monitor.run_tick().await;
        let trend = outcome.reports[0].memory_trend.as_ref().unwrap();
        assert_eq!(trend.trend, MemoryTrend::SignificantGrowth);
        // 持续增长只是警告
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.alerts.iter().any(|a| a.alert_type == "memory-growth"));
    }

    #[tokio::test]
    async fn test_cadence_skips_category_until_due() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig::default();
        config
            .categories
            .get_mut(&MetricCategory::BundleSize)
            .unwrap()
            .cadence_secs = Some(600);
        let probe = FixedProbe::new(MetricCategory::BundleSize, Some(artifacts(10)));
        let runs = Arc::clone(&probe.runs);
        let mut monitor = ContinuousMonitor::new(
            config,
            Box::new(MemoryBaselineStore::new()),
            ReportStore::new(dir.path(), 10),
            Box::new(LogSink),
        )
        .with_probe(Box::new(probe));

        let start = Utc::now();
        monitor.run_tick_at(start).await;
        let second = monitor.run_tick_at(start + ChronoDuration::seconds(60)).await;
        assert_eq!(second.skipped, vec![MetricCategory::BundleSize]);
        assert!(!second.baseline_updated);
        monitor.run_tick_at(start + ChronoDuration::seconds(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_category_is_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig::default();
        config
            .categories
            .get_mut(&MetricCategory::LoadTime)
            .unwrap()
            .enabled = false;
        let probe = FixedProbe::new(MetricCategory::LoadTime, None);
        let runs = Arc::clone(&probe.runs);
        let mut monitor = ContinuousMonitor::new(
            config,
            Box::new(MemoryBaselineStore::new()),
            ReportStore::new(dir.path(), 10),
            Box::new(LogSink),
        )
        .with_probe(Box::new(probe));

        let outcome = monitor.run_tick().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(outcome.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_reports_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = monitor(MemoryBaselineStore::new(), dir.path())
            .with_probe(Box::new(FixedProbe::new(MetricCategory::BundleSize, Some(artifacts(10)))));
        monitor.run_tick().await;
        let stored = ReportStore::new(dir.path(), 10).load_all().unwrap();
        assert_eq!(stored[&MetricCategory::BundleSize].len(), 1);
    }

    #[tokio::test]
    async fn test_run_schedule_stops_after_max_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig::default();
        config.schedule.interval_secs = 1;
        let probe = FixedProbe::new(MetricCategory::BundleSize, Some(artifacts(10)));
        let runs = Arc::clone(&probe.runs);
        let mut monitor = ContinuousMonitor::new(
            config,
            Box::new(MemoryBaselineStore::new()),
            ReportStore::new(dir.path(), 10),
            Box::new(LogSink),
        )
        .with_probe(Box::new(probe));
        let worst = monitor.run_schedule(Some(2)).await;
        assert_eq!(worst, 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
