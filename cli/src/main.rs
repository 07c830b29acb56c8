//! CLI entrypoint for Tool Orchestra
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod commands;
mod output;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use commands::{Cli, Command, OutputFormat, RunArgs};
use orchestra_application::{
    BundleEngine, CompositeEventSink, EventSink, Orchestrator, RedactingEventSink,
    ReliabilityManager, ToolRegistry,
};
use orchestra_domain::{Budget, OrchestrationConfig, OrchestrationRequest};
use orchestra_infrastructure::config::FileEventsConfig;
use orchestra_infrastructure::{
    ConfigLoader, FieldRedactor, FileConfig, JsonlEventSink, TracingEventSink, load_schemas,
    register_builtin_tools,
};
use output::ConsoleFormatter;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    info!("Starting Tool Orchestra");

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_deref()).map_err(|e| anyhow!("{}", e))?
    };
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Config => {
            if !cli.no_config {
                print!(
                    "{}",
                    ConsoleFormatter::format_sources(&ConfigLoader::sources(cli.config.as_deref()))
                );
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Tools => {
            let registry = build_registry()?;
            print!("{}", ConsoleFormatter::format_tools(&registry.list()));
        }
        Command::Run(args) => run(args, &config).await?,
    }

    Ok(())
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Initialize logging based on verbosity level
    let filter = match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file_name = path
                .file_name()
                .with_context(|| format!("--log-file {} has no file name", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Could not create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn build_registry() -> Result<ToolRegistry> {
    let registry = ToolRegistry::new();
    register_builtin_tools(&registry)?;
    Ok(registry)
}

fn build_event_sink(events: &FileEventsConfig) -> Arc<dyn EventSink> {
    let mut sinks: Vec<Arc<dyn EventSink>> = Vec::new();
    if events.tracing {
        sinks.push(Arc::new(TracingEventSink));
    }
    if let Some(path) = &events.jsonl_path {
        // JsonlEventSink::new already logged the reason
        if let Some(sink) = JsonlEventSink::new(path) {
            sinks.push(Arc::new(sink));
        }
    }

    let sink: Arc<dyn EventSink> = Arc::new(CompositeEventSink::new(sinks));
    let redactor = FieldRedactor::new(&events.redact_fields);
    if redactor.is_empty() {
        sink
    } else {
        Arc::new(RedactingEventSink::new(sink, Arc::new(redactor)))
    }
}

fn build_orchestrator(config: &FileConfig) -> Result<Orchestrator> {
    // === Dependency Injection ===
    let registry = Arc::new(build_registry()?);

    let base_dir = std::env::current_dir().context("Could not read the working directory")?;
    let schemas = load_schemas(&config.schemas, &base_dir)?;

    let orchestrator = if config.orchestration.reliable {
        let reliability = ReliabilityManager::from_config(&config.to_reliability_config())
            .with_classifier(config.retry.to_classifier());
        Orchestrator::reliable(registry, Arc::new(reliability))
    } else {
        Orchestrator::new(registry)
    };

    Ok(orchestrator
        .with_planner(config.planner.to_planner())
        .with_engine(BundleEngine::new(Arc::new(schemas)))
        .with_event_sink(build_event_sink(&config.events))
        .with_settings(config.to_orchestrator_settings()))
}

fn build_request(args: &RunArgs, orchestrator: &Orchestrator) -> Result<OrchestrationRequest> {
    let payload: Value =
        serde_json::from_str(&args.payload).context("--payload is not valid JSON")?;
    let mut request = OrchestrationRequest::new(payload);

    if let Some(options) = &args.options {
        let options: Value =
            serde_json::from_str(options).context("--options is not valid JSON")?;
        request = request.with_tool_options(options);
    }
    if let Some(tool) = &args.tool {
        request = request.with_tool(tool);
    }

    if args.has_bundle_overrides() {
        let mut bundle = orchestrator.settings().default_bundle.clone();
        if let Some(k) = args.k {
            bundle = bundle.with_k(k);
        }
        if let Some(epsilon) = args.epsilon {
            bundle = bundle.with_epsilon(Some(epsilon));
        }
        if args.no_early_stop {
            bundle = bundle.with_epsilon(None);
        }
        if let Some(uri) = &args.schema {
            bundle = bundle.with_schema_uri(uri);
        }
        request = request.with_bundle_options(bundle);
    }

    let mut config = OrchestrationConfig::default();
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    if let Some(key) = &args.idempotency_key {
        config = config.with_idempotency_key(key);
    }
    if let Some(trace_id) = &args.trace_id {
        config = config.with_trace_id(trace_id);
    }
    if args.has_budget() {
        let mut budget = Budget::default();
        if let Some(tokens) = args.budget_tokens {
            budget = budget.with_tokens(tokens);
        }
        if let Some(cost) = args.budget_cost {
            budget = budget.with_cost_usd(cost);
        }
        config = config.with_budget(budget);
    }

    Ok(request.with_config(config))
}

async fn run(args: RunArgs, config: &FileConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let request = build_request(&args, &orchestrator)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            interrupt.cancel();
        }
    });

    let output = orchestrator.run_with_cancel(request, &cancel).await?;

    let rendered = match args.output {
        OutputFormat::Full => ConsoleFormatter::format(&output),
        OutputFormat::Content => ConsoleFormatter::format_content(&output),
        OutputFormat::Json => ConsoleFormatter::format_json(&output),
    };
    println!("{}", rendered);

    if !output.is_completed() {
        bail!("Run {} failed", output.request_id);
    }
    Ok(())
}
