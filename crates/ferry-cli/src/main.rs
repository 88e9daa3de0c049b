use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ferry_core::domain::BrokerError;
use ferry_core::impls::{InMemoryStore, LogBroker, RecordingBroker};
use ferry_core::observability::StoreCounts;
use ferry_core::ports::{MessageBroker, OutboxStore, SendResult};
use ferry_core::retry::retryable;
use ferry_core::{Dispatcher, DispatcherSettings, Message, OutboxError};

/// Run outbox dispatchers against an in-memory store.
#[derive(Debug, Parser)]
#[command(name = "ferry", version, about)]
struct Args {
    /// Dispatcher settings (TOML). Defaults are used when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dispatcher instances sharing the store.
    #[arg(short, long, default_value_t = 2)]
    instances: usize,

    /// Messages enqueued before the dispatchers start.
    #[arg(short, long, default_value_t = 100)]
    messages: usize,

    /// Stop after this many seconds (Ctrl+C stops earlier).
    #[arg(long, default_value_t = 10)]
    run_for_secs: u64,

    /// Probability that a send fails with a retryable error.
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    #[arg(long, value_enum, default_value_t = BrokerKind::Recording)]
    broker: BrokerKind,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BrokerKind {
    /// Keep sent messages in memory and check for duplicates.
    Recording,
    /// Only log each message.
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Fails a share of sends before handing them to the inner broker.
struct FlakyBroker {
    inner: Arc<dyn MessageBroker>,
    failure_rate: f64,
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn send(&self, message: &Message) -> SendResult {
        if rand::random::<f64>() < self.failure_rate {
            return Err(retryable(BrokerError::Unavailable(
                "simulated outage".to_string(),
            )));
        }
        self.inner.send(message).await
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    counts: StoreCounts,
    errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicates: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format)?;

    if args.instances == 0 {
        bail!("--instances must be at least 1");
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        bail!("--failure-rate must be between 0 and 1");
    }

    let settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => DispatcherSettings::default(),
    };
    info!(?settings, "settings loaded");

    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref(), args.messages).await?;

    let recording = Arc::new(RecordingBroker::new());
    let inner: Arc<dyn MessageBroker> = match args.broker {
        BrokerKind::Recording => recording.clone(),
        BrokerKind::Log => Arc::new(LogBroker),
    };
    let broker: Arc<dyn MessageBroker> = Arc::new(FlakyBroker {
        inner,
        failure_rate: args.failure_rate,
    });

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel::<OutboxError>();
    let error_log = tokio::spawn(async move {
        let mut seen = 0usize;
        while let Some(err) = errors_rx.recv().await {
            for err in err.into_flat() {
                warn!(error = %err, "dispatcher reported an error");
                seen += 1;
            }
        }
        seen
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(args.instances);
    for _ in 0..args.instances {
        let dispatcher = Dispatcher::builder(store.clone(), broker.clone())
            .settings(settings.clone())
            .build()
            .context("invalid dispatcher settings")?;
        handles.push(dispatcher.run(errors_tx.clone(), shutdown_rx.clone()));
    }
    drop(errors_tx);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.run_for_secs)) => {
            info!(seconds = args.run_for_secs, "run time elapsed");
        }
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("received Ctrl+C");
        }
    }

    info!("shutting down");
    shutdown_tx.send_replace(true);
    for handle in handles {
        if let Err(err) = handle.join().await {
            error!(error = %err, "dispatcher loop panicked");
        }
    }
    let errors = error_log.await.context("error logger task failed")?;

    let duplicates = match args.broker {
        BrokerKind::Recording => Some(count_duplicates(&recording.sent().await)),
        BrokerKind::Log => None,
    };
    let summary = Summary {
        counts: store.counts().await.context("failed to read store counts")?,
        errors,
        duplicates,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.duplicates.unwrap_or(0) > 0 {
        bail!("duplicate deliveries detected");
    }
    Ok(())
}

fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialize json logging")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to initialize pretty logging")?,
    }

    Ok(())
}

fn load_settings(path: &Path) -> Result<DispatcherSettings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let settings: DispatcherSettings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    Ok(settings)
}

async fn seed(store: &dyn OutboxStore, messages: usize) -> Result<()> {
    for n in 0..messages {
        let message = Message::json(
            "orders",
            format!("order-{n}"),
            &serde_json::json!({ "order_id": n, "status": "created" }),
        )?;
        store.enqueue(message).await?;
    }
    info!(messages, "outbox seeded");
    Ok(())
}

/// Deliveries beyond the first per key.
fn count_duplicates(sent: &[Message]) -> usize {
    let mut per_key: HashMap<&str, usize> = HashMap::new();
    for message in sent {
        *per_key.entry(message.key.as_str()).or_default() += 1;
    }
    per_key.values().map(|n| n.saturating_sub(1)).sum()
}
