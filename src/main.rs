use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resilient_exec::error::{ErrorClassifier, ExecutionContext, RecoveryCoordinator, StaticFallback};
use resilient_exec::{OperationError, ResilienceConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilient-exec")]
#[command(about = "Classify failures and exercise retry, circuit breaker and degradation policies")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, global = true, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a failure and print the resulting error record
    Classify {
        /// Error message as produced by the failing call
        message: String,

        /// HTTP-style status code carried by the failure
        #[arg(long)]
        status: Option<u16>,

        /// Database driver code carried by the failure
        #[arg(long)]
        db_code: Option<String>,

        /// Operation name recorded on the error
        #[arg(short, long, default_value = "cli_classify")]
        operation: String,
    },

    /// Run a scripted failing operation through the coordinator
    Simulate {
        /// Operation name (selects the circuit breaker and fallback)
        #[arg(short, long)]
        operation: String,

        /// Error message each failing attempt produces
        #[arg(short, long)]
        error: String,

        /// HTTP-style status code for the failure
        #[arg(long)]
        status: Option<u16>,

        /// Attempts that fail before the operation succeeds, per call
        #[arg(long, default_value = "1")]
        fail_times: u32,

        /// Number of calls to execute
        #[arg(long, default_value = "1")]
        calls: u32,

        /// Override retry.base_delay_ms
        #[arg(long)]
        base_delay_ms: Option<u64>,

        /// JSON value served as fallback once retries are exhausted
        #[arg(long)]
        fallback: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.debug, cli.json);

    let config = ResilienceConfig::load(cli.config.as_deref())
        .context("Failed to load resilience configuration")?;

    match cli.command {
        Commands::Classify {
            message,
            status,
            db_code,
            operation,
        } => classify(&message, status, db_code, &operation)?,
        Commands::Simulate {
            operation,
            error,
            status,
            fail_times,
            calls,
            base_delay_ms,
            fallback,
        } => {
            let mut config = config;
            if let Some(base_delay_ms) = base_delay_ms {
                config.retry.base_delay_ms = base_delay_ms;
                config.retry.max_delay_ms = config.retry.max_delay_ms.max(base_delay_ms);
            }
            simulate(
                config,
                Scenario {
                    operation,
                    error,
                    status,
                    fail_times,
                    calls,
                    fallback,
                },
            )
            .await?
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_error(message: &str, status: Option<u16>, db_code: Option<String>) -> OperationError {
    match (status, db_code) {
        (_, Some(code)) => OperationError::database(code, message),
        (Some(status), None) => OperationError::http(status, message),
        (None, None) => OperationError::from(message),
    }
}

fn classify(
    message: &str,
    status: Option<u16>,
    db_code: Option<String>,
    operation: &str,
) -> Result<()> {
    let error = build_error(message, status, db_code);
    let record = ErrorClassifier::new().classify(&error, &ExecutionContext::new(operation), 1);

    println!("{}", serde_json::to_string_pretty(&record)?);
    println!(
        "Suggested HTTP status: {}",
        record.category().suggested_http_status(record.code())
    );
    Ok(())
}

struct Scenario {
    operation: String,
    error: String,
    status: Option<u16>,
    fail_times: u32,
    calls: u32,
    fallback: Option<String>,
}

async fn simulate(config: ResilienceConfig, scenario: Scenario) -> Result<()> {
    let mut coordinator = RecoveryCoordinator::new(config);
    if let Some(fallback) = &scenario.fallback {
        let value: serde_json::Value =
            serde_json::from_str(fallback).context("Fallback must be valid JSON")?;
        coordinator = coordinator.with_fallback(&scenario.operation, Arc::new(StaticFallback(value)))?;
    }

    println!(
        "Simulating {} call(s) of '{}' failing {} time(s) each",
        scenario.calls, scenario.operation, scenario.fail_times
    );

    for call in 1..=scenario.calls {
        let context = ExecutionContext::new(scenario.operation.clone())
            .with_metadata("call", call.to_string());
        let failures = AtomicU32::new(0);
        let failures = &failures;
        let scenario = &scenario;

        let result = coordinator
            .execute(&context, move || {
                let failed_so_far = failures.fetch_add(1, Ordering::SeqCst);
                async move {
                    if failed_so_far < scenario.fail_times {
                        Err(build_error(&scenario.error, scenario.status, None))
                    } else {
                        Ok(serde_json::json!({ "call": call }))
                    }
                }
            })
            .await;

        match result {
            Ok(outcome) if outcome.stale => println!(
                "  call {}: degraded after {} attempt(s) -> {}",
                call, outcome.attempts, outcome.value
            ),
            Ok(outcome) => println!(
                "  call {}: ok after {} attempt(s) -> {}",
                call, outcome.attempts, outcome.value
            ),
            Err(record) => println!(
                "  call {}: failed with {} ({}) after {} attempt(s)",
                call,
                record.code(),
                record.message(),
                record.attempt()
            ),
        }
    }

    println!("\nCircuit breakers:");
    println!(
        "{}",
        serde_json::to_string_pretty(&coordinator.get_circuit_breaker_status())?
    );

    println!("\nError statistics (last minute):");
    println!(
        "{}",
        serde_json::to_string_pretty(&coordinator.get_error_statistics(Duration::from_secs(60)))?
    );

    Ok(())
}
