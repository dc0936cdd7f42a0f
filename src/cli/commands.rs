//! CLI command definitions

use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "fintrack-live")]
#[command(about = "Watch live prices and notifications from the Fintrack broker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Broker endpoint
    #[arg(
        long,
        env = "FINTRACK_WS_URL",
        global = true,
        default_value = "http://localhost:8080/ws-stock-prices"
    )]
    pub url: String,

    /// Seconds between reconnection attempts
    #[arg(long, global = true, default_value_t = 5, value_parser = parse_positive)]
    pub reconnect_delay: u64,

    /// Exit instead of retrying when the connection fails
    #[arg(long, global = true)]
    pub no_reconnect: bool,

    /// Only try the endpoint itself, not the SockJS `/websocket` path
    #[arg(long, global = true)]
    pub no_sockjs: bool,
}

impl Cli {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print price updates for the given symbols
    ///
    /// Examples:
    ///   fintrack-live watch-prices RELIANCE TCS
    ///   fintrack-live watch-prices INFY --refresh
    WatchPrices {
        /// Stock symbols
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Ask the server for a fresh price once connected
        #[arg(long)]
        refresh: bool,
    },

    /// Print notifications for a user
    WatchNotifications {
        /// User ID
        #[arg(long, env = "FINTRACK_USER_ID")]
        user: i64,
    },

    /// Print price batches, portfolio updates and, optionally, notifications
    WatchAll {
        /// User ID for notifications
        #[arg(long, env = "FINTRACK_USER_ID")]
        user: Option<i64>,
    },
}

fn parse_positive(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("Invalid number: {}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_prices() {
        let cli = Cli::try_parse_from([
            "fintrack-live",
            "--url",
            "http://broker:8080/ws",
            "watch-prices",
            "TCS",
            "INFY",
            "--refresh",
        ])
        .unwrap();

        assert_eq!(cli.url, "http://broker:8080/ws");
        assert_eq!(cli.reconnect_delay(), Duration::from_secs(5));
        match cli.command {
            Commands::WatchPrices { symbols, refresh } => {
                assert_eq!(symbols, vec!["TCS", "INFY"]);
                assert!(refresh);
            }
            _ => panic!("expected watch-prices"),
        }
    }

    #[test]
    fn test_reconnect_delay_must_be_positive() {
        assert!(Cli::try_parse_from([
            "fintrack-live",
            "--reconnect-delay",
            "0",
            "watch-all",
        ])
        .is_err());
    }

    #[test]
    fn test_watch_prices_requires_symbols() {
        assert!(Cli::try_parse_from(["fintrack-live", "watch-prices"]).is_err());
    }
}
