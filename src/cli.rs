use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "finance-dashboard")]
#[command(about = "Rate-limited, cached access to market data providers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding `assets/providers/*.json`; the built-in provider table is used when omitted
    #[arg(long, env = "FINANCE_DASHBOARD_CONFIG_ROOT")]
    pub config_root: Option<PathBuf>,

    /// JSON file the response cache is persisted to
    #[arg(long, env = "FINANCE_DASHBOARD_STATE_FILE", default_value = "dashboard_state.json")]
    pub state_file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured providers, their limits and endpoints
    Providers,

    /// Call any configured endpoint
    Fetch {
        provider: String,
        endpoint: String,
        /// Arguments as key=value pairs (e.g. symbol=IBM interval=5min)
        args: Vec<String>,
    },

    /// Latest quote for a symbol
    Quote {
        symbol: String,

        #[arg(short, long, default_value = "alphaVantage")]
        provider: String,
    },

    /// Poll an endpoint like a dashboard widget until interrupted
    Watch {
        provider: String,
        endpoint: String,
        args: Vec<String>,

        /// Seconds between polls
        #[arg(short, long, default_value_t = 30)]
        interval: u64,
    },

    /// Answer one call the way the same-origin relay endpoint does
    Relay {
        /// Query parameters as key=value pairs (symbol, exchange, endpoint, api_key)
        params: Vec<String>,

        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
    },

    /// Inspect or clear the persisted response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    Stats,
    Clear,
    ClearExpired,
    ClearProvider { provider: String },
}
