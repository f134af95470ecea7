use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{GatekeeperConfig, LoggingConfig};
use gatekeeper::metrics::{InMemoryMetricsStore, MetricsAggregator, TrafficLedger};
use gatekeeper::policy::{PolicyFile, PolicyReloader, PolicySource, PolicyStore, YamlPolicySource};
use gatekeeper::ratelimit::{
    BurstLimiter, CounterSweeper, Decision, DecisionEngine, InMemoryCounterStore,
    RequestDescriptor,
};
use gatekeeper::scheduler::Scheduler;
use gatekeeper::violations::{
    run_alert_worker, AlertEvaluator, InMemoryViolationStore, LogNotifier, ViolationRecorder,
};

#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about = "Policy-driven rate limiting engine")]
struct Cli {
    /// Configuration file (YAML), layered with GATEKEEPER__* environment variables
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate JSON-lines request descriptors from stdin
    Run {
        /// Policy file, overrides `policies.path`
        #[arg(short, long)]
        policies: Option<String>,
    },
    /// Check a policy file and exit
    Validate {
        /// Policy file to validate
        policies: String,
    },
}

/// One line of `run` output.
#[derive(Serialize)]
struct Verdict<'a> {
    status: u16,
    headers: BTreeMap<&'static str, String>,
    #[serde(flatten)]
    decision: &'a Decision,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = GatekeeperConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate { policies } => validate(&policies),
        Command::Run { policies } => {
            if policies.is_some() {
                config.policies.path = policies;
            }
            run(config).await
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn validate(path: &str) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let file = PolicyFile::from_yaml(&contents)?;
    let store = PolicyStore::new();
    let mut failures = 0;
    for policy in file.policies {
        let name = policy.name.clone();
        if let Err(e) = store.upsert(policy) {
            error!(policy = %name, error = %e, "Invalid policy");
            failures += 1;
            continue;
        }
        if let Some(Err(reason)) = store.get_by_name(&name).map(|p| p.patterns.clone()) {
            error!(policy = %name, error = %reason, "Malformed pattern");
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of the policies in {} are invalid", failures, path);
    }
    info!(path, policies = store.len(), "Policy file is valid");
    Ok(())
}

async fn run(config: GatekeeperConfig) -> anyhow::Result<()> {
    info!("Starting Gatekeeper admission engine");

    let policies = match &config.policies.path {
        Some(path) => {
            let source: Arc<dyn PolicySource> = Arc::new(YamlPolicySource::new(path));
            Arc::new(PolicyStore::with_source(source)?)
        }
        None => {
            warn!("No policy file configured, every request is unrestricted");
            Arc::new(PolicyStore::new())
        }
    };
    info!(policies = policies.len(), "Policies loaded");

    let counters = Arc::new(InMemoryCounterStore::new());
    let bursts = Arc::new(BurstLimiter::new());
    let ledger = Arc::new(TrafficLedger::new(config.metrics.bucket_secs));
    let violations = Arc::new(InMemoryViolationStore::new(config.engine.violation_retention));

    let (alert_tx, alert_rx) = mpsc::channel(config.engine.alert_queue_capacity.max(1));
    let recorder = ViolationRecorder::new(violations.clone(), config.engine.violation_write_timeout())
        .with_alerts(alert_tx);
    let evaluator = Arc::new(
        AlertEvaluator::new(violations.clone(), config.alerts.rules.clone())
            .with_notifier("log", Arc::new(LogNotifier))
            .with_notify_timeout(Duration::from_millis(config.alerts.notify_timeout_ms)),
    );

    let engine = Arc::new(
        DecisionEngine::new(policies.clone(), counters.clone(), recorder)
            .with_burst_limiter(bursts.clone())
            .with_ledger(ledger.clone())
            .with_backend_timeout(config.engine.backend_timeout()),
    );

    let mut scheduler = Scheduler::new();
    scheduler.spawn_periodic(
        Arc::new(CounterSweeper::new(counters, bursts)),
        config.engine.sweep_interval(),
    );
    scheduler.spawn_periodic(
        Arc::new(MetricsAggregator::new(
            policies.clone(),
            ledger,
            violations,
            Arc::new(InMemoryMetricsStore::new()),
            config.metrics.top_n,
        )),
        Duration::from_secs(config.metrics.bucket_secs.max(1)),
    );
    if config.policies.path.is_some() && config.policies.reload_interval_secs > 0 {
        scheduler.spawn_periodic(
            Arc::new(PolicyReloader::new(policies)),
            Duration::from_secs(config.policies.reload_interval_secs),
        );
    }
    scheduler.spawn_worker("alert-worker", move |shutdown| {
        run_alert_worker(evaluator, alert_rx, shutdown)
    });

    tokio::select! {
        result = serve_stdin(engine.clone()) => {
            if let Err(e) = result {
                error!(error = %e, "Request stream failed");
            }
            info!("Request stream closed");
        }
        _ = shutdown_signal() => {}
    }

    scheduler.shutdown().await;
    let stats = engine.stats();
    info!(
        allowed = stats.allowed,
        denied = stats.denied,
        degraded = stats.degraded,
        "Gatekeeper stopped"
    );
    Ok(())
}

/// Read one JSON request descriptor per line and answer with one JSON verdict per line.
async fn serve_stdin(engine: Arc<DecisionEngine>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RequestDescriptor = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Skipping malformed request line");
                continue;
            }
        };

        let decision = engine.check(&request).await;
        let verdict = Verdict {
            status: decision.status_code(),
            headers: decision.headers().into_iter().collect(),
            decision: &decision,
        };
        let mut out = serde_json::to_vec(&verdict)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
