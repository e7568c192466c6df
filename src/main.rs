//! CLI entry point: loads a grid config, wires it to an exchange adapter,
//! starts the coordinator, and runs its monitoring loops until shutdown.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use grid_trader::config::GridConfig;
use grid_trader::coordinator::GridCoordinator;
use grid_trader::exchange::{ExchangeAdapter, MockExchange, OrderData, WireStatus};
use grid_trader::health::{expected_order_count, OrderHealthChecker};
use grid_trader::position_monitor::PositionMonitor;
use grid_trader::reserve::{NoReserve, ReserveGate, SpotReserve};
use grid_trader::stats::StatsPublisher;
use grid_trader::types::{MonitoringMode, OrderUpdate, OrderWireStatus};
use rust_decimal::Decimal;

/// Maps a venue's raw order payload onto the crate's own wire status, the
/// shape `GridCoordinator::handle_stream_update` expects regardless of
/// whether it arrived over a stream or a REST reconciliation poll.
fn order_update_from_stream(data: OrderData) -> OrderUpdate {
    let status = match data.status {
        WireStatus::Open => OrderWireStatus::Open,
        WireStatus::PartiallyFilled => OrderWireStatus::PartiallyFilled,
        WireStatus::Filled => OrderWireStatus::Filled,
        WireStatus::Cancelled => OrderWireStatus::Cancelled,
    };
    OrderUpdate {
        order_id: data.id,
        client_id: data.client_id,
        status,
        side: data.side,
        price: data.average.unwrap_or(data.price),
        amount: data.amount,
        filled: data.filled,
    }
}

#[derive(Parser, Debug)]
#[command(name = "grid-trader", about = "Automated grid-trading coordinator")]
struct Cli {
    /// Path to the grid_system YAML config.
    config_path: String,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,

    /// Redis URL the dashboard publisher connects to.
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

/// Builds the adapter for `config.exchange`. Only a venue identifier is
/// resolved here; a real venue client is an external collaborator that
/// implements `ExchangeAdapter` and is plugged in at this single seam.
fn build_exchange(config: &GridConfig) -> Arc<dyn ExchangeAdapter> {
    let creds = config.venue_credentials();
    if creds.api_key.is_none() {
        log::warn!("no API credentials found for exchange '{}', running against an in-memory adapter", config.exchange);
    }
    Arc::new(MockExchange::default())
}

fn build_reserve(config: &GridConfig) -> Box<dyn ReserveGate> {
    if config.spot_reserve.enabled {
        Box::new(SpotReserve::from_config(&config.spot_reserve))
    } else {
        Box::new(NoReserve)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match GridConfig::load_yaml(&cli.config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("loaded grid config for {} on {} ({:?})", config.symbol, config.exchange, config.grid_type);

    let exchange = build_exchange(&config);
    if let Err(e) = exchange.connect().await {
        log::error!("failed to connect to exchange: {e}");
        return ExitCode::FAILURE;
    }

    let reserve = build_reserve(&config);
    let coordinator = Arc::new(GridCoordinator::new(config.clone(), exchange.clone(), reserve));

    if let Err(e) = coordinator.startup().await {
        log::error!("startup failed: {e}");
        return ExitCode::FAILURE;
    }
    log::info!("grid live with {} resting orders", coordinator.resting_order_count().await);

    let position_monitor = Arc::new(PositionMonitor::new(
        exchange.clone(),
        config.symbol.clone(),
        Duration::from_secs(config.rest_position_query_interval),
    ));
    let health_checker = Arc::new(OrderHealthChecker::new(&config));
    let grid_count = config.grid_count();

    // Order/fill delivery: prefer a live user-data stream and fall back to
    // REST polling when the adapter has none. Reconciliation against REST
    // still runs periodically even while streaming, to catch a dark fill
    // that happened during a disconnect.
    {
        let coordinator = coordinator.clone();
        let subscribe_coordinator = coordinator.clone();
        let callback: grid_trader::exchange::OrderStreamCallback = Arc::new(move |data| {
            let coordinator = subscribe_coordinator.clone();
            let update = order_update_from_stream(data);
            tokio::spawn(async move {
                if let Err(e) = coordinator.handle_stream_update(update).await {
                    log::warn!("failed to handle streamed order update: {e}");
                }
            });
        });
        match exchange.subscribe_user_data(callback).await {
            Ok(()) => {
                coordinator.set_monitoring_mode(MonitoringMode::Stream).await;
                log::info!("subscribed to the user-data order stream");
            }
            Err(e) => {
                log::info!("streaming order updates unavailable ({e}), falling back to REST polling");
                coordinator.set_monitoring_mode(MonitoringMode::RestPoll).await;
            }
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                if let Err(e) = coordinator.poll_rest_events().await {
                    log::warn!("order reconciliation failed: {e}");
                }
            }
        });
    }

    // Position drift detection. An implausible jump pauses new placement
    // rather than trusting a bad read.
    {
        let coordinator = coordinator.clone();
        let monitor = position_monitor.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval());
            loop {
                ticker.tick().await;
                if coordinator.sync_position(&monitor).await != grid_trader::position_monitor::PositionAnomaly::None {
                    log::warn!("implausible position growth detected, pausing new orders");
                }
            }
        });
    }

    // Structural order-book health: wrong counts, duplicate levels, or
    // off-grid prices trigger a full reset once confirmed across every
    // snapshot the checker takes.
    if config.order_health_check_enabled {
        let coordinator = coordinator.clone();
        let checker = health_checker.clone();
        let expected = expected_order_count(&config, grid_count);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(checker.interval());
            loop {
                ticker.tick().await;
                if coordinator.is_network_fault().await {
                    continue;
                }
                match coordinator.diagnose_and_repair(&checker, expected).await {
                    Ok(verdict) => log::debug!("order health check: {verdict:?}"),
                    Err(e) => log::warn!("order health repair failed: {e}"),
                }
            }
        });
    }

    // Mark-price driven risk evaluation: capital protection, take-profit,
    // stop-loss, price-lock, and the two scalping modes are all re-checked
    // on every tick.
    {
        let coordinator = coordinator.clone();
        let exchange = exchange.clone();
        let symbol = config.symbol.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                ticker.tick().await;
                let price = match exchange.get_ticker(&symbol).await {
                    Ok(t) => t.last_price,
                    Err(_) => continue,
                };
                let previous = coordinator.observe_price(price).await;
                if previous == Decimal::ZERO {
                    continue;
                }
                if let Err(e) = coordinator.evaluate_risk_modes(price, previous).await {
                    log::error!("risk mode evaluation failed: {e}");
                    if e.is_latching() {
                        log::error!("unrecoverable state anomaly, exiting");
                        std::process::exit(1);
                    }
                }
            }
        });
    }

    // Dashboard snapshot publisher.
    {
        let coordinator = coordinator.clone();
        let redis_url = cli.redis_url.clone();
        tokio::spawn(async move {
            let mut publisher = match StatsPublisher::new(&redis_url) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("stats publisher disabled, could not build redis client: {e}");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                let stats = coordinator.capture_stats().await;
                if let Err(e) = publisher.publish(&stats).await {
                    log::warn!("failed to publish grid stats: {e}");
                }
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("shutdown signal received"),
        Err(e) => log::error!("failed to listen for shutdown signal: {e}"),
    }

    if let Err(e) = coordinator.shutdown().await {
        log::error!("error during shutdown: {e}");
        return ExitCode::FAILURE;
    }
    exchange.disconnect().await.ok();
    log::info!("shutdown complete");
    ExitCode::SUCCESS
}
