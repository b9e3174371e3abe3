use std::time::Duration;

use clap::{Parser, Subcommand};
use jsonrpsee::http_client::HttpClientBuilder;
use url::Url;
use veridex::{
    state::MarketStatus,
    types::{
        MarketId, Operator, Outcome, ResolutionCriteria, Scalar, Side,
        UserId,
    },
};
use veridex_app_rpc_api::{CreateMarketRequest, RpcClient};

#[derive(Clone, Debug, Subcommand)]
#[command(arg_required_else_help(true))]
pub enum Command {
    /// Register a user account
    CreateUser {
        name: String,
        #[arg(long, default_value_t = 1000.0)]
        balance: f64,
    },
    /// Show a user account
    GetUser { user: UserId },
    /// Create a market
    CreateMarket {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: Option<String>,
        /// "manual" or a URL understood by the data fetcher
        #[arg(long)]
        source: Option<String>,
        /// Dotted path into the fetched payload, e.g. data.results[0].price
        #[arg(long)]
        path: Option<String>,
        /// equals, not_equals, >, >=, <, <=, or contains
        #[arg(long)]
        operator: Option<Operator>,
        /// Comparison target; parsed as bool, number, or string
        #[arg(long)]
        value: Option<String>,
        /// Close time as a Unix timestamp
        #[arg(long)]
        closes_at: u64,
        #[arg(long)]
        creator: UserId,
        /// LMSR liquidity parameter
        #[arg(long)]
        liquidity: Option<f64>,
        /// Opening YES probability in [0.01, 0.99]
        #[arg(long)]
        probability: Option<f64>,
    },
    /// List markets, optionally filtered by status
    ListMarkets {
        #[arg(long, value_parser = parse_status)]
        status: Option<MarketStatus>,
    },
    /// Show market detail with prices, volume, and history
    MarketView { market: MarketId },
    /// Price a buy without executing it
    QuoteBuy {
        market: MarketId,
        side: Side,
        amount: f64,
    },
    /// Price a sell without executing it
    QuoteSell {
        market: MarketId,
        side: Side,
        shares: f64,
    },
    /// Spend cash on shares of one side of a market
    Buy {
        #[arg(long)]
        user: UserId,
        market: MarketId,
        side: Side,
        amount: f64,
    },
    /// Sell shares back to the market maker
    Sell {
        #[arg(long)]
        user: UserId,
        market: MarketId,
        side: Side,
        shares: f64,
    },
    /// Resolve a market; pass --outcome for a manual override
    ResolveMarket {
        market: MarketId,
        #[arg(long)]
        outcome: Option<Outcome>,
        #[arg(long)]
        resolved_by: Option<String>,
    },
    /// Show the resolution proof for a resolved market
    GetResolution { market: MarketId },
    /// Show balance and positions for a user
    Portfolio { user: UserId },
    /// Show aggregate trading statistics for a market
    MarketStats { market: MarketId },
    /// Show price history for a market
    PriceHistory { market: MarketId },
    /// Show the latest trades for a market
    RecentTrades {
        market: MarketId,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_status(s: &str) -> Result<MarketStatus, String> {
    match s.to_ascii_lowercase().as_str() {
        "open" => Ok(MarketStatus::Open),
        "closed" => Ok(MarketStatus::Closed),
        "resolved" => Ok(MarketStatus::Resolved),
        _ => Err(format!("expected open, closed, or resolved, got {s:?}")),
    }
}

/// Parse a comparison target: bool and number readings win over plain
/// strings.
fn parse_scalar(s: &str) -> Scalar {
    if let Ok(b) = s.parse::<bool>() {
        Scalar::Bool(b)
    } else if let Ok(n) = s.parse::<f64>() {
        Scalar::Number(n)
    } else {
        Scalar::String(s.to_owned())
    }
}

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:6285";

#[derive(Clone, Debug, Parser)]
#[command(name = "veridex-cli", version, about = "Veridex RPC client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// URL of the RPC server
    #[arg(long, default_value = DEFAULT_RPC_URL)]
    pub rpc_url: Url,
    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<String> {
        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(self.timeout_secs))
            .build(self.rpc_url.as_str())?;
        let output = match self.command {
            Command::CreateUser { name, balance } => {
                let user = client.create_user(name, balance).await?;
                serde_json::to_string_pretty(&user)?
            }
            Command::GetUser { user } => {
                let user = client.get_user(user).await?;
                serde_json::to_string_pretty(&user)?
            }
            Command::CreateMarket {
                title,
                category,
                source,
                path,
                operator,
                value,
                closes_at,
                creator,
                liquidity,
                probability,
            } => {
                let criteria = match (path, operator, value) {
                    (Some(path), Some(operator), Some(value)) => {
                        Some(ResolutionCriteria {
                            path,
                            operator,
                            value: parse_scalar(&value),
                        })
                    }
                    (None, None, None) => None,
                    _ => anyhow::bail!(
                        "--path, --operator, and --value must be given \
                         together"
                    ),
                };
                let market = client
                    .create_market(CreateMarketRequest {
                        title,
                        category,
                        source,
                        criteria,
                        closes_at,
                        creator,
                        liquidity,
                        initial_probability: probability,
                    })
                    .await?;
                serde_json::to_string_pretty(&market)?
            }
            Command::ListMarkets { status } => {
                let markets = client.list_markets(status).await?;
                serde_json::to_string_pretty(&markets)?
            }
            Command::MarketView { market } => {
                let view = client.market_view(market).await?;
                serde_json::to_string_pretty(&view)?
            }
            Command::QuoteBuy {
                market,
                side,
                amount,
            } => {
                let quote = client.quote_buy(market, side, amount).await?;
                serde_json::to_string_pretty(&quote)?
            }
            Command::QuoteSell {
                market,
                side,
                shares,
            } => {
                let quote = client.quote_sell(market, side, shares).await?;
                serde_json::to_string_pretty(&quote)?
            }
            Command::Buy {
                user,
                market,
                side,
                amount,
            } => {
                let execution =
                    client.buy(user, market, side, amount).await?;
                serde_json::to_string_pretty(&execution)?
            }
            Command::Sell {
                user,
                market,
                side,
                shares,
            } => {
                let execution =
                    client.sell(user, market, side, shares).await?;
                serde_json::to_string_pretty(&execution)?
            }
            Command::ResolveMarket {
                market,
                outcome,
                resolved_by,
            } => {
                let report = client
                    .resolve_market(market, outcome, resolved_by)
                    .await?;
                serde_json::to_string_pretty(&report)?
            }
            Command::GetResolution { market } => {
                let resolution = client.get_resolution(market).await?;
                serde_json::to_string_pretty(&resolution)?
            }
            Command::Portfolio { user } => {
                let portfolio = client.portfolio(user).await?;
                serde_json::to_string_pretty(&portfolio)?
            }
            Command::MarketStats { market } => {
                let stats = client.market_stats(market).await?;
                serde_json::to_string_pretty(&stats)?
            }
            Command::PriceHistory { market } => {
                let history = client.price_history(market).await?;
                serde_json::to_string_pretty(&history)?
            }
            Command::RecentTrades { market, limit } => {
                let trades = client.recent_trades(market, limit).await?;
                serde_json::to_string_pretty(&trades)?
            }
        };
        Ok(output)
    }
}
