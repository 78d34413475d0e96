//! Copy-trading platform binary: wires the scheduler, signal worker,
//! position monitor, and the thin command/query API into one process.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use copytrade_core::cache::{IdempotencyStore, SnapshotCache};
use copytrade_core::credentials::StaticCredentialProvider;
use copytrade_core::db::{
    FollowRepository, PositionRepository, SignalRepository, TradeRepository, UserRepository,
    WhaleRepository,
};
use copytrade_core::dlq::DeadLetterQueue;
use copytrade_core::events::EventBus;
use copytrade_core::venues::{AdapterRegistry, Resilience, ResilienceConfig};
use copytrade_core::AppConfig;
use risk_manager::RiskManager;
use trading_engine::{CopyTradeEngine, EngineDeps, PositionMonitor, SignalWorker};
use whale_tracker::{PollingScheduler, SchedulerDeps};

use api_server::state::AppState;

/// Whale copy-trading platform
#[derive(Parser)]
#[command(name = "api-server")]
#[command(about = "Whale observation, signal generation, and copy-trade execution")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full platform: scheduler, workers, monitor, and API (default)
    Serve,
    /// Run only the API surface (no background roles)
    ApiOnly,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "api_server=info,copytrade_core=info,whale_tracker=info,trading_engine=info,risk_manager=info,sqlx=warn,hyper=warn"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;

    let pool = copytrade_core::db::connect(&config.database)
        .await
        .context("connecting to postgres")?;
    let redis = copytrade_core::cache::connect(&config.redis)
        .await
        .context("connecting to redis")?;

    let users = Arc::new(UserRepository::new(pool.clone()));
    let whales = Arc::new(WhaleRepository::new(pool.clone()));
    let follows = Arc::new(FollowRepository::new(pool.clone()));
    let signals = Arc::new(SignalRepository::new(pool.clone()));
    let trades = Arc::new(TradeRepository::new(pool.clone()));
    let positions = Arc::new(PositionRepository::new(pool.clone()));

    let adapters = AdapterRegistry::with_defaults();
    let resilience = Arc::new(Resilience::new(ResilienceConfig {
        retry: config.retry.clone(),
        breaker: config.breaker.clone(),
    }));
    let snapshots = SnapshotCache::new(redis.clone());
    let idempotency = IdempotencyStore::new(redis, config.idempotency.completion_ttl_secs);
    let bus = EventBus::default();
    let dlq = Arc::new(DeadLetterQueue::new(1_000));

    // Notification/analytics consumers attach here; in-process we only log.
    bus.spawn_handler("event_log", Some(dlq.clone()), |event| async move {
        tracing::debug!(event = event.kind(), "domain event");
        Ok(())
    });

    let engine = Arc::new(CopyTradeEngine::new(EngineDeps {
        pool: pool.clone(),
        users: users.clone(),
        follows: follows.clone(),
        signals: signals.clone(),
        trades: trades.clone(),
        positions: positions.clone(),
        adapters: adapters.clone(),
        resilience: resilience.clone(),
        credentials: Arc::new(StaticCredentialProvider::new()),
        idempotency,
        bus: bus.clone(),
        dlq: dlq.clone(),
        risk: RiskManager::new(config.engine.min_trading_balance, config.engine.min_trade_size),
        config: config.engine.clone(),
        idem_config: config.idempotency.clone(),
    }));

    let run_background = !matches!(cli.command, Some(Commands::ApiOnly));
    if run_background {
        let scheduler = Arc::new(PollingScheduler::new(
            SchedulerDeps {
                whales: whales.clone(),
                signals: signals.clone(),
                snapshots,
                adapters,
                resilience,
                bus,
                dlq: dlq.clone(),
            },
            config.polling.clone(),
        ));
        scheduler.spawn();

        let worker = Arc::new(SignalWorker::new(engine.clone()));
        worker.spawn();

        let monitor = Arc::new(PositionMonitor::new(engine.clone(), config.monitor.clone()));
        monitor.spawn();
    } else {
        info!("background roles disabled (api-only mode)");
    }

    let state = AppState {
        engine,
        users,
        whales,
        follows,
        signals,
        trades,
        positions,
        dlq,
    };

    let app = api_server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.api.bind_addr))?;
    info!(addr = %config.api.bind_addr, "API listening");
    axum::serve(listener, app).await.context("serving API")?;
    Ok(())
}
