//! End-to-end coverage of the coordinator's public surface: bringing a
//! grid up, routing fills through REST reconciliation, reacting to price
//! moves, and repairing a damaged book.

use std::sync::Arc;

use grid_trader::config::{GridConfig, PositionToleranceConfig, SpotReserveConfig};
use grid_trader::coordinator::GridCoordinator;
use grid_trader::exchange::{ExchangeAdapter, MockExchange};
use grid_trader::health::OrderHealthChecker;
use grid_trader::reserve::{NoReserve, SpotReserve};
use grid_trader::types::GridType;
use rust_decimal_macros::dec;

fn base_config() -> GridConfig {
    GridConfig {
        exchange: "backpack".into(),
        symbol: "BTC_USDC_PERP".into(),
        grid_type: GridType::Long,
        lower_price: Some(dec!(100.0)),
        upper_price: Some(dec!(200.0)),
        grid_interval: dec!(10),
        order_amount: dec!(0.001),
        quantity_precision: 3,
        price_decimals: 1,
        fee_rate: dec!(0.0001),
        max_position: None,
        martingale_increment: None,
        follow_grid_count: None,
        follow_timeout: 300,
        follow_distance: 1,
        price_offset_grids: 0,
        reverse_order_grid_distance: 1,
        scalping_enabled: false,
        scalping_trigger_percent: 80,
        scalping_take_profit_grids: 2,
        smart_scalping_enabled: false,
        allowed_deep_drops: 1,
        min_drop_threshold_percent: 10,
        capital_protection_enabled: false,
        capital_protection_trigger_percent: 50,
        take_profit_enabled: false,
        take_profit_percentage: dec!(0.01),
        price_lock_enabled: false,
        price_lock_threshold: None,
        price_lock_start_at_threshold: false,
        stop_loss_protection_enabled: false,
        stop_loss_trigger_percent: dec!(100.0),
        stop_loss_escape_timeout: 300,
        stop_loss_apr_threshold: dec!(50.0),
        order_health_check_enabled: true,
        order_health_check_interval: 300,
        health_check_snapshot_count: 2,
        rest_position_query_interval: 60,
        margin_mode: "isolated".into(),
        leverage: 10,
        exit_cleanup_enabled: true,
        spot_reserve: SpotReserveConfig::default(),
        position_tolerance: PositionToleranceConfig::default(),
    }
}

#[tokio::test]
async fn a_dark_fill_found_on_rest_places_a_reverse_order() {
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(base_config(), exchange.clone(), Box::new(NoReserve)));
    coordinator.startup().await.unwrap();
    assert_eq!(coordinator.resting_order_count().await, 10);

    // Simulate a fill the exchange recorded while no stream was attached:
    // find the open BUY at 130 and mark it filled directly on the venue.
    let open = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    let buy_at_130 = open.iter().find(|o| o.price == dec!(130.0)).unwrap();
    exchange.fill_order(&buy_at_130.id, dec!(130.0));

    coordinator.poll_rest_events().await.unwrap();

    assert_eq!(coordinator.resting_order_count().await, 10);
    let open_after = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    assert!(open_after.iter().any(|o| o.price == dec!(140.0)));
    assert!(!coordinator.is_paused().await);
}

#[tokio::test]
async fn a_spot_reserve_blocks_a_sell_that_would_dip_below_the_floor() {
    let mut config = base_config();
    config.spot_reserve = SpotReserveConfig { enabled: true, reserve_amount: dec!(10), spot_buy_fee_rate: dec!(0.0001), ..SpotReserveConfig::default() };
    let reserve = Box::new(SpotReserve::from_config(&config.spot_reserve));

    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(config, exchange.clone(), reserve));
    coordinator.startup().await.unwrap();

    // Tracked position starts at zero, so any reverse SELL would dip below
    // the configured reserve floor and must be skipped rather than placed.
    let open = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    let buy_at_130 = open.iter().find(|o| o.price == dec!(130.0)).unwrap();
    exchange.fill_order(&buy_at_130.id, dec!(130.0));

    coordinator.poll_rest_events().await.unwrap();

    let open_after = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    assert!(!open_after.iter().any(|o| o.price == dec!(140.0)));
    // Nine resting orders remain: the filled BUY is gone and nothing
    // replaced it.
    assert_eq!(coordinator.resting_order_count().await, 9);
}

#[tokio::test]
async fn capital_protection_arms_once_price_falls_to_the_trigger_grid_and_pauses_new_placement() {
    let mut config = base_config();
    config.capital_protection_enabled = true;
    config.capital_protection_trigger_percent = 50;
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(config, exchange.clone(), Box::new(NoReserve)));
    coordinator.startup().await.unwrap();

    // Ten levels span 100..200; a 50% trigger arms at grid index 5, and a
    // price of 140 maps to that same index.
    coordinator.evaluate_risk_modes(dec!(140), dec!(150)).await.unwrap();

    let stats = coordinator.capture_stats().await;
    assert!(stats.active_modes.contains(&"capital_protection"));
    assert!(coordinator.is_paused().await);
}

#[tokio::test]
async fn an_unhealthy_order_book_triggers_a_repair_reset() {
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(base_config(), exchange, Box::new(NoReserve)));
    coordinator.startup().await.unwrap();

    // Lie about the expected count so the checker sees a mismatch against
    // the real ten-order book, the same shape a missed cancel would cause.
    let checker = OrderHealthChecker::new(&base_config());
    let verdict = coordinator.diagnose_and_repair(&checker, 9).await.unwrap();

    assert_ne!(verdict, grid_trader::health::HealthVerdict::Healthy);
    // The reset rebuilds the full ladder against the grid's own config,
    // so the book is healthy again regardless of what was claimed expected.
    assert_eq!(coordinator.resting_order_count().await, 10);
}

#[tokio::test]
async fn shutdown_without_exit_cleanup_leaves_resting_orders_on_the_book() {
    let mut config = base_config();
    config.exit_cleanup_enabled = false;
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(config, exchange.clone(), Box::new(NoReserve)));
    coordinator.startup().await.unwrap();

    coordinator.shutdown().await.unwrap();

    let open_after = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    assert_eq!(open_after.len(), 10);
}

#[tokio::test]
async fn a_price_crossing_above_the_lock_threshold_latches_the_mode_once() {
    let mut config = base_config();
    config.price_lock_enabled = true;
    config.price_lock_threshold = Some(dec!(160));
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(config, exchange, Box::new(NoReserve)));
    coordinator.startup().await.unwrap();

    coordinator.evaluate_risk_modes(dec!(165), dec!(155)).await.unwrap();
    let first = coordinator.capture_stats().await;
    assert!(first.active_modes.contains(&"price_lock"));

    // A second crossing shouldn't re-trigger anything once a lock price is
    // already recorded; the mode stays latched rather than flapping.
    coordinator.evaluate_risk_modes(dec!(170), dec!(165)).await.unwrap();
    let second = coordinator.capture_stats().await;
    assert!(second.active_modes.contains(&"price_lock"));
}

#[tokio::test]
async fn a_fresh_position_reading_never_pauses_the_grid_on_its_own() {
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(base_config(), exchange.clone(), Box::new(NoReserve)));
    coordinator.startup().await.unwrap();

    let monitor = grid_trader::position_monitor::PositionMonitor::new(exchange, "BTC_USDC_PERP".into(), std::time::Duration::from_secs(60));
    let verdict = coordinator.sync_position(&monitor).await;

    assert_eq!(verdict, grid_trader::position_monitor::PositionAnomaly::None);
    assert!(!coordinator.is_paused().await);
}

#[tokio::test]
async fn a_manual_pause_blocks_a_reverse_order_and_resume_lets_the_next_fill_through() {
    let exchange = Arc::new(MockExchange::new(dec!(10_000), dec!(150)));
    let coordinator = Arc::new(GridCoordinator::new(base_config(), exchange.clone(), Box::new(NoReserve)));
    coordinator.startup().await.unwrap();

    coordinator.pause(grid_trader::types::PauseReason::Manual).await;

    let open = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    let buy_at_130 = open.iter().find(|o| o.price == dec!(130.0)).unwrap();
    exchange.fill_order(&buy_at_130.id, dec!(130.0));
    coordinator.poll_rest_events().await.unwrap();

    let open_after_pause = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    assert!(!open_after_pause.iter().any(|o| o.price == dec!(140.0)));
    assert_eq!(coordinator.resting_order_count().await, 9);

    coordinator.resume().await;

    let buy_at_120 = open_after_pause.iter().find(|o| o.price == dec!(120.0)).unwrap();
    exchange.fill_order(&buy_at_120.id, dec!(120.0));
    coordinator.poll_rest_events().await.unwrap();

    let open_after_resume = exchange.get_open_orders("BTC_USDC_PERP").await.unwrap();
    assert!(open_after_resume.iter().any(|o| o.price == dec!(130.0)));
    assert_eq!(coordinator.resting_order_count().await, 9);
}
