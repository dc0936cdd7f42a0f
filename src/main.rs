//! fintrack-live entry point

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use fintrack_realtime::feeds::{NotificationCallback, NotificationFeed, PriceFeed};
use fintrack_realtime::notify::{PermissionState, SurfaceSink, TracingSurface};
use fintrack_realtime::{ConnectionState, Session, SessionConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = SessionConfig::new(cli.url.clone())
        .reconnect_delay(cli.reconnect_delay())
        .sockjs_fallback(!cli.no_sockjs);
    if cli.no_reconnect {
        config = config.no_reconnect();
    }

    let session = Session::new(config);
    tokio::spawn(log_state_changes(session.state_receiver()));

    match cli.command {
        Commands::WatchPrices { symbols, refresh } => watch_prices(&session, symbols, refresh).await,
        Commands::WatchNotifications { user } => watch_notifications(&session, user).await,
        Commands::WatchAll { user } => watch_all(&session, user).await,
    }
}

async fn watch_prices(session: &Session, symbols: Vec<String>, refresh: bool) -> Result<()> {
    let feed = PriceFeed::new(session.clone());

    for symbol in &symbols {
        feed.subscribe_symbol(symbol, |update| {
            println!(
                "{:<12} {:>12} {:>10} {:>8}%",
                update.symbol,
                format_price(update.current_price),
                format_price(update.change),
                format_price(update.change_percent),
            );
        })
        .with_context(|| format!("Invalid symbol: {}", symbol))?;
    }

    session.activate().await.context("Failed to connect")?;

    if refresh {
        for symbol in &symbols {
            if let Err(e) = feed.request_price(symbol) {
                warn!(symbol = %symbol, error = %e, "Price refresh request failed");
            }
        }
    }

    wait_for_ctrl_c().await?;
    feed.unsubscribe_all();
    session.deactivate().await;
    Ok(())
}

async fn watch_notifications(session: &Session, user: i64) -> Result<()> {
    let feed = attach_notifications(session, user)?;

    session.activate().await.context("Failed to connect")?;

    wait_for_ctrl_c().await?;
    feed.detach();
    session.deactivate().await;
    Ok(())
}

async fn watch_all(session: &Session, user: Option<i64>) -> Result<()> {
    let prices = PriceFeed::new(session.clone());

    prices.subscribe_all(|updates| {
        for update in updates {
            println!("{:<12} {:>12}", update.symbol, format_price(update.current_price));
        }
    })?;
    prices.subscribe_portfolio(|event| println!("portfolio: {}", event))?;

    let notifications = user
        .map(|user| attach_notifications(session, user))
        .transpose()?;

    session.activate().await.context("Failed to connect")?;

    wait_for_ctrl_c().await?;
    prices.unsubscribe_all();
    if let Some(feed) = notifications {
        feed.detach();
    }
    session.deactivate().await;
    Ok(())
}

fn attach_notifications(session: &Session, user: i64) -> Result<NotificationFeed> {
    let sink = SurfaceSink::spawn(TracingSurface::new(PermissionState::Granted));
    let print: NotificationCallback = Arc::new(|notification| {
        println!(
            "[{}] {}: {}",
            notification.kind,
            notification.title,
            notification.message.as_deref().unwrap_or("")
        );
    });

    NotificationFeed::attach(session, user, Arc::new(sink), Some(print))
        .with_context(|| format!("Invalid user id: {}", user))
}

async fn log_state_changes(mut states: watch::Receiver<ConnectionState>) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        info!(state = %state, "Connection state");
    }
}

async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    Ok(())
}

fn format_price(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}
