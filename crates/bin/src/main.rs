//! Optimum CLI binary.
//!
//! Provides command-line interface for portfolio construction. Service
//! credentials are read from `OPTIMUM_USERNAME`/`OPTIMUM_PASSWORD` or
//! `OPTIMUM_TOKEN`.

mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use optimum::{ModelMethod, RecommendationMethod};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "optimum")]
#[command(about = "Optimum: portfolio construction on a remote optimizer", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve prices and show the portfolio
    Prices {
        #[command(flatten)]
        portfolio: PortfolioArgs,
    },

    /// Retrieve models and show per-asset return and risk
    Models {
        #[command(flatten)]
        portfolio: PortfolioArgs,

        #[command(flatten)]
        models: ModelArgs,
    },

    /// Retrieve the efficient frontier
    Frontier {
        #[command(flatten)]
        portfolio: PortfolioArgs,

        #[command(flatten)]
        models: ModelArgs,

        #[command(flatten)]
        frontier: FrontierArgs,
    },

    /// Recommend an allocation on the frontier
    Recommend {
        #[command(flatten)]
        portfolio: PortfolioArgs,

        #[command(flatten)]
        models: ModelArgs,

        #[command(flatten)]
        frontier: FrontierArgs,

        /// Target expected return (defaults to the return at current risk)
        #[arg(long)]
        mu: Option<f64>,

        /// Recommendation method (approximate or exact)
        #[arg(long, default_value = "approximate")]
        method: RecommendationMethod,
    },
}

#[derive(Args)]
struct PortfolioArgs {
    /// Holdings CSV with a `ticker` and an optional `shares` column
    portfolio: PathBuf,
}

#[derive(Args)]
struct ModelArgs {
    /// Market index used as factor (repeatable)
    #[arg(long = "market", default_values_t = ["^DJI".to_string()])]
    market: Vec<String>,

    /// Estimation range (repeatable)
    #[arg(long = "range", default_values_t = ["1mo".to_string(), "6mo".to_string(), "1y".to_string()])]
    ranges: Vec<String>,

    /// Return statistic
    #[arg(long, default_value = "median", value_parser = ["median", "mean"])]
    return_model: String,

    /// Use factors common to all ranges
    #[arg(long)]
    common: bool,

    /// Range weight as LABEL=WEIGHT (repeatable)
    #[arg(long = "weight")]
    weights: Vec<String>,

    /// Model combination method (linear or linear-fractional)
    #[arg(long, default_value = "linear")]
    method: ModelMethod,
}

#[derive(Args)]
struct FrontierArgs {
    /// Cash added (positive) or withdrawn (negative)
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    cashflow: f64,

    /// Largest total value that may be sold
    #[arg(long, default_value = "0")]
    max_sales: f64,

    /// Regularization weight
    #[arg(long, default_value = "0")]
    rho: f64,

    /// Disallow short positions
    #[arg(long)]
    no_short: bool,

    /// Disallow purchases
    #[arg(long)]
    no_buy: bool,

    /// Disallow sales
    #[arg(long)]
    no_sell: bool,

    /// Constraint as TICKERS:FUNCTION:SIGN:VALUE[:UNIT], e.g.
    /// `AAPL,MSFT:holdings:<=:100:shares` (repeatable)
    #[arg(long = "constraint")]
    constraints: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Prices { portfolio } => {
            commands::prices(&portfolio, cli.format).await?;
        }
        Commands::Models { portfolio, models } => {
            commands::models(&portfolio, &models, cli.format).await?;
        }
        Commands::Frontier {
            portfolio,
            models,
            frontier,
        } => {
            commands::frontier(&portfolio, &models, &frontier, cli.format).await?;
        }
        Commands::Recommend {
            portfolio,
            models,
            frontier,
            mu,
            method,
        } => {
            commands::recommend(&portfolio, &models, &frontier, mu, method, cli.format).await?;
        }
    }

    Ok(())
}
