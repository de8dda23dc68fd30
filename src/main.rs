//! circuit-retry CLI
//!
//! Drives a simulated flaky operation through the retry executor so policies
//! can be tried out from the command line.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────┐     ┌───────────────────────────────────────────────┐
//!   │ config (TOML)│────▶│                 RetryExecutor                  │
//!   │  + watcher   │     │                                                │
//!   └──────────────┘     │  ┌─────────────┐   ┌─────────────────────────┐ │
//!                        │  │ ResultCache │   │     CircuitBreaker      │ │
//!   simulated op ───────▶│  │  (run-once) │   │ Closed / Open / HalfOpen│ │
//!                        │  └─────────────┘   │   + recovery timer      │ │
//!                        │                    └─────────────────────────┘ │
//!   handler table ──────▶│  failure kind → substitute result              │
//!                        └───────────────────────────────────────────────┘
//!                                           │
//!                                           ▼
//!                              JSON report (result, invocations, breaker)
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::Rng;
use serde::Serialize;

use circuit_retry::config::{load_config, AppConfig, ConfigWatcher, RetryConfig, SharedConfig};
use circuit_retry::observability::{logging, metrics};
use circuit_retry::resilience::{
    BreakerSnapshot, CircuitBreaker, HandlerTable, ResultCache, RetryExecutor,
};

#[derive(Parser)]
#[command(name = "circuit-retry")]
#[command(about = "Retry a flaky operation behind a circuit breaker", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulated operation once and print a report
    Simulate(SimulateArgs),
    /// Validate the configuration and print it
    CheckConfig,
    /// Re-run the simulation on an interval, hot-reloading the config file
    Watch {
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,

        #[command(flatten)]
        simulate: SimulateArgs,
    },
}

#[derive(Args, Clone)]
struct SimulateArgs {
    /// Number of leading calls that fail.
    #[arg(long, default_value_t = 2)]
    failures: u32,

    /// Fail each call with this probability instead of a fixed count.
    #[arg(long)]
    flaky: Option<f64>,

    /// Failure raised by the operation. Only timed-out has a handler.
    #[arg(long, value_enum, default_value_t = FailureArg::TimedOut)]
    kind: FailureArg,

    /// Run-once identifier.
    #[arg(long)]
    id: Option<String>,
}

#[derive(ValueEnum, Clone, Copy)]
enum FailureArg {
    TimedOut,
    Refused,
}

impl From<FailureArg> for io::ErrorKind {
    fn from(arg: FailureArg) -> Self {
        match arg {
            FailureArg::TimedOut => io::ErrorKind::TimedOut,
            FailureArg::Refused => io::ErrorKind::ConnectionRefused,
        }
    }
}

#[derive(Serialize)]
struct Report {
    id: Option<String>,
    result: Option<i64>,
    invocations: u32,
    breaker: BreakerSnapshot,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    logging::init_logging(&config.observability);

    tracing::info!(
        max_tries = config.retry.max_tries,
        delay_ms = config.retry.delay_ms,
        half_open_threshold = config.retry.half_open_threshold,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let cache = ResultCache::named("simulate");

    match cli.command {
        Commands::Simulate(args) => {
            let report = simulate(&config.retry, &cache, &args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Watch {
            interval_secs,
            simulate: args,
        } => {
            let shared = SharedConfig::new(config);
            let _watcher = match &cli.config {
                Some(path) => Some(ConfigWatcher::new(path, shared.clone()).run()?),
                None => None,
            };
            watch(shared, cache, Duration::from_secs(interval_secs.max(1)), args).await;
        }
    }

    Ok(())
}

async fn watch(shared: SharedConfig, cache: ResultCache<i64>, interval: Duration, args: SimulateArgs) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let config = shared.load();
                match simulate(&config.retry, &cache, &args).await {
                    Ok(report) => match serde_json::to_string(&report) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::error!(error = %e, "Failed to encode report"),
                    },
                    Err(e) => tracing::error!(error = %e, kind = ?e.kind(), "Simulation failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, stopping");
                break;
            }
        }
    }
}

async fn simulate(
    retry: &RetryConfig,
    cache: &ResultCache<i64>,
    args: &SimulateArgs,
) -> Result<Report, io::Error> {
    let policy = retry.policy();
    let breaker = CircuitBreaker::new("simulate", policy.breaker_config());
    let executor = RetryExecutor::new(policy, cache.clone())
        .with_name("simulate")
        .with_breaker(breaker.clone());

    let handlers = HandlerTable::<i64, io::Error>::new().on(io::ErrorKind::TimedOut, |e| {
        tracing::info!(error = %e, "Substituting -1 for timed out call");
        -1
    });

    let invocations = Arc::new(AtomicU32::new(0));
    let operation = {
        let invocations = invocations.clone();
        let failures = args.failures;
        let flaky = args.flaky;
        let kind = io::ErrorKind::from(args.kind);
        move || {
            let call = invocations.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let fail = match flaky {
                    Some(p) => rand::thread_rng().gen_bool(p.clamp(0.0, 1.0)),
                    None => call <= failures,
                };
                if fail {
                    Err(io::Error::new(kind, format!("simulated failure on call {}", call)))
                } else {
                    Ok(i64::from(call))
                }
            }
        }
    };

    let result = executor.run_async(operation, &handlers, args.id.as_deref()).await?;

    Ok(Report {
        id: args.id.clone(),
        result,
        invocations: invocations.load(Ordering::SeqCst),
        breaker: breaker.snapshot(),
    })
}
