use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Arg, ArgAction, ArgMatches, Command};
use perf_regression_monitor::{
    BaselineStore, ContinuousMonitor, FileBaselineStore, MetricCategory, MonitorConfig,
    ReportAggregator, ReportFormat, ReportRenderer, ReportStore, notify, probe,
};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("perf-regression-monitor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Performance regression detection with baselines, trends and leak verdicts")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (.toml or .json)")
                .global(true)
                .required(false),
        )
        .subcommand(Command::new("run").about("Run every enabled probe once"))
        .subcommand(
            Command::new("watch")
                .about("Run probes on the configured schedule")
                .arg(
                    Arg::new("ticks")
                        .long("ticks")
                        .value_name("NUM")
                        .help("Stop after this many ticks")
                        .value_parser(clap::value_parser!(usize))
                        .required(false),
                ),
        )
        .subcommand(
            Command::new("aggregate")
                .about("Summarize report history into trends and recommendations")
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_name("FORMAT")
                        .help("Report format (text, json, markdown)")
                        .required(false),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Output report file path")
                        .required(false),
                )
                .arg(
                    Arg::new("stdout")
                        .long("stdout")
                        .help("Print the report instead of writing a file")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("baseline").about("Print the stored baselines"))
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<MonitorConfig> {
    match matches.get_one::<String>("config").map(PathBuf::from) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            Ok(MonitorConfig::from_file(&path)?)
        }
        None => Ok(MonitorConfig::default()),
    }
}

fn build_monitor(config: MonitorConfig) -> anyhow::Result<ContinuousMonitor> {
    let baselines = FileBaselineStore::new(config.storage.baseline_dir.clone());
    let reports = ReportStore::from_config(&config.storage);
    let sink = notify::sink_from_config(&config.notification)?;
    // 浏览器自动化由外部提供，命令行版本只运行不依赖浏览器的探针
    let probes = probe::build_probes(&config, None);
    Ok(ContinuousMonitor::new(config, Box::new(baselines), reports, sink).with_probes(probes))
}

async fn run(config: MonitorConfig) -> anyhow::Result<u8> {
    let mut monitor = build_monitor(config)?;
    let outcome = monitor.run_tick().await;

    println!("Performance Regression Monitor");
    println!("==============================");
    for report in &outcome.reports {
        println!(
            "{:<18} warnings: {:<3} critical: {:<3} new: {}",
            report.category.tag(),
            report.summary.warnings,
            report.summary.errors,
            report.summary.new_metrics
        );
    }
    for alert in &outcome.alerts {
        println!("  [{}] {}", alert.alert_type, alert.message);
    }
    if outcome.has_critical() {
        println!("Critical issues found; baseline NOT updated.");
    } else if outcome.baseline_updated {
        println!("Baseline updated.");
    }
    Ok(outcome.exit_code() as u8)
}

async fn watch(config: MonitorConfig, ticks: Option<usize>) -> anyhow::Result<u8> {
    let mut monitor = build_monitor(config)?;
    tracing::info!(
        "Watching every {} s",
        monitor.config().schedule.interval_secs
    );
    tokio::select! {
        worst = monitor.run_schedule(ticks) => return Ok(worst as u8),
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
    }
    // 中断时沿用已完成 tick 的结果
    Ok(monitor.worst_exit_code() as u8)
}

fn aggregate(config: &MonitorConfig, matches: &ArgMatches) -> anyhow::Result<u8> {
    let format = match matches.get_one::<String>("format") {
        Some(f) => f.parse::<ReportFormat>()?,
        None => config.report.format,
    };
    let output = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.report.output_path.clone());

    let store = ReportStore::from_config(&config.storage);
    let history = store.load_all()?;
    let view = ReportAggregator::default().aggregate(&history);
    let renderer = ReportRenderer::new(format);

    if matches.get_flag("stdout") {
        println!("{}", renderer.render_aggregate(&view)?);
    } else {
        renderer.save_aggregate(&view, &output)?;
        println!("Report saved to: {}", output.display());
    }
    println!(
        "{} reports, {} recommendations",
        view.summary.total_reports,
        view.recommendations.len()
    );
    Ok(0)
}

fn baseline(config: &MonitorConfig) -> anyhow::Result<u8> {
    let store = FileBaselineStore::new(config.storage.baseline_dir.clone());
    for category in MetricCategory::ALL {
        let snapshot = store.load(category);
        match snapshot.timestamp {
            Some(ts) => println!("{} ({})", category, ts.format("%Y-%m-%d %H:%M:%S")),
            None if snapshot.is_empty() => {
                println!("{}: no baseline", category);
                continue;
            }
            None => println!("{}", category),
        }
        for (metric, value) in &snapshot.values {
            println!("  {:<32} {:.2}", metric, value);
        }
    }
    Ok(0)
}

async fn dispatch(matches: ArgMatches) -> anyhow::Result<u8> {
    let config = load_config(&matches)?;
    match matches.subcommand() {
        Some(("run", _)) => run(config).await,
        Some(("watch", sub)) => watch(config, sub.get_one::<usize>("ticks").copied()).await,
        Some(("aggregate", sub)) => aggregate(&config, sub),
        Some(("baseline", _)) => baseline(&config),
        _ => unreachable!("subcommand is required"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match dispatch(cli().get_matches()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
