//! Newstrace CLI
//!
//! Runs the observability runtime for one agent process and offers
//! read-side queries over the file-backed stores.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use newstrace::api::HttpServer;
use newstrace::config::{Config, LoggingConfig};
use newstrace::logs::{ConsoleHandler, LogAggregator, LogCollector, LogStorage};
use newstrace::models::{LogFilter, LogQuery, QueryOperator, TraceQuery};
use newstrace::monitoring::{MetricsCollector, PerformanceMonitor, TracingAlertHandler};
use newstrace::trace::{TracePipeline, TraceStorage};

/// Newstrace - observability for news-processing agents
#[derive(Parser)]
#[command(name = "newstrace")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "NEWSTRACE_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the observability runtime with the exposition endpoint
    Serve {
        /// Host to bind the exposition server to
        #[arg(long, env = "NEWSTRACE_HOST")]
        host: Option<String>,

        /// Port for /metrics and /health
        #[arg(long, env = "NEWSTRACE_PORT")]
        port: Option<u16>,
    },

    /// Query stored traces
    Traces {
        /// Only traces touching this service
        #[arg(long)]
        service: Option<String>,

        /// Only traces containing errors
        #[arg(long)]
        errors_only: bool,

        /// Maximum traces to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Query stored logs
    Logs {
        /// Filter by level (DEBUG, INFO, WARNING, ERROR)
        #[arg(long)]
        level: Option<String>,

        /// Filter by message substring
        #[arg(long)]
        contains: Option<String>,

        /// Maximum entries to list
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show storage statistics
    Stats,
}

fn init_tracing(config: &LoggingConfig, verbose: bool) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if config.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    init_tracing(&config.logging, cli.verbose);

    let result = match cli.command {
        Commands::Serve { host, port } => run_serve(config, host, port).await,
        Commands::Traces {
            service,
            errors_only,
            limit,
        } => run_traces(config, service, errors_only, limit),
        Commands::Logs {
            level,
            contains,
            limit,
        } => run_logs(config, level, contains, limit),
        Commands::Stats => run_stats(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_serve(config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    config.validate()?;
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    // Metrics, alerting, and host monitoring.
    let metrics = Arc::new(MetricsCollector::new(config.metrics.clone())?);
    metrics.register_handler(Arc::new(TracingAlertHandler));
    let metrics_worker = metrics.spawn_worker();

    let monitor = Arc::new(PerformanceMonitor::new(
        config.performance.clone(),
        Arc::clone(&metrics),
    ));
    let monitor_worker = monitor.spawn_worker();

    // Log pipeline: collector -> aggregator -> bucketed storage.
    let log_storage = Arc::new(LogStorage::new(
        &config.logs.storage_root,
        config.logs.indexed_fields.clone(),
    )?);
    let aggregator = Arc::new(LogAggregator::new(config.logs.flush_strategy.clone()));
    aggregator.register_backend(log_storage);
    let aggregator_worker = aggregator.spawn_flush_worker();

    let log_collector = Arc::new(LogCollector::new(
        &config.logs,
        &config.identity,
        Arc::clone(&aggregator),
    ));
    log_collector.register_handler(Arc::new(ConsoleHandler));
    let log_worker = log_collector.spawn_worker();

    // Trace pipeline: collector -> processor/analyzer -> storage.
    let pipeline = Arc::new(TracePipeline::new(config.traces.clone(), &config.identity)?);
    let pipeline_workers = pipeline.start();

    let server = HttpServer::new(Arc::clone(&metrics));
    let addr = format!("{host}:{port}");
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&addr).await {
            error!(error = %e, "Exposition server failed");
        }
    });

    info!(
        service = %config.identity.service_name,
        agent = %config.identity.agent_name,
        "Newstrace runtime started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, flushing buffers");

    // Producers stop first so every accepted entry drains downstream.
    log_collector.shutdown();
    log_worker.await?;
    aggregator.shutdown().await;
    aggregator_worker.await?;

    pipeline.shutdown();
    for worker in pipeline_workers {
        worker.await?;
    }

    monitor.shutdown();
    monitor_worker.await?;
    metrics.shutdown();
    metrics_worker.await?;
    server_handle.abort();

    info!("Newstrace runtime stopped");
    Ok(())
}

fn run_traces(
    config: Config,
    service: Option<String>,
    errors_only: bool,
    limit: usize,
) -> anyhow::Result<()> {
    let storage = TraceStorage::new(&config.traces.storage_root)?;
    let result = storage.query_traces(&TraceQuery {
        has_errors: errors_only.then_some(true),
        service,
        limit,
        ..TraceQuery::default()
    })?;

    println!("{} trace(s), showing {}", result.total_count, result.traces.len());
    for trace in result.traces {
        println!(
            "{}  {}  spans={} errors={} duration={}ms",
            trace.trace_id,
            trace.started_at.format("%Y-%m-%d %H:%M:%S"),
            trace.total_spans,
            trace.error_count,
            trace
                .duration_ms
                .map_or_else(|| "-".to_string(), |d| format!("{d:.0}")),
        );
    }
    Ok(())
}

fn run_logs(
    config: Config,
    level: Option<String>,
    contains: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let storage = LogStorage::new(&config.logs.storage_root, config.logs.indexed_fields.clone())?;

    let mut filters = Vec::new();
    if let Some(level) = level {
        filters.push(LogFilter::new(
            "level",
            QueryOperator::Equals,
            serde_json::Value::String(level.to_uppercase()),
        ));
    }
    if let Some(needle) = contains {
        filters.push(LogFilter::new(
            "message",
            QueryOperator::Contains,
            serde_json::Value::String(needle),
        ));
    }

    let result = storage.query_logs(&LogQuery {
        filters,
        limit,
        ..LogQuery::default()
    })?;

    println!("{} entr(ies), showing {}", result.total_count, result.entries.len());
    for entry in result.entries {
        println!(
            "{} {:7} [{}] {}",
            entry.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            entry.level.to_string(),
            entry.agent_name,
            entry.message
        );
    }
    Ok(())
}

fn run_stats(config: Config) -> anyhow::Result<()> {
    let traces = TraceStorage::new(&config.traces.storage_root)?.get_stats()?;
    let logs = LogStorage::new(&config.logs.storage_root, config.logs.indexed_fields.clone())?
        .get_storage_stats()?;

    println!("Traces: {} stored, {} spans", traces.total_traces, traces.total_spans);
    println!("Logs:   {} bucket file(s), {} entries", logs.file_count, logs.entry_count);
    Ok(())
}
