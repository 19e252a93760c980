//! Command implementations.

use crate::{Format, FrontierArgs, ModelArgs, PortfolioArgs};
use optimum::portfolio::{ReturnModel, holdings::Holdings};
use optimum::{
    Constraint, ConstraintUnit, FrontierParams, ModelRequest, Portfolio, Recommendation,
    RecommendationMethod, TradingOptions,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::error::Error;
use tracing::{debug, info};

type CliResult<T> = Result<T, Box<dyn Error>>;

fn load(args: &PortfolioArgs) -> CliResult<Portfolio> {
    let mut portfolio = Portfolio::from_env()?;
    portfolio.import_csv_path(&args.portfolio)?;
    debug!(path = %args.portfolio.display(), assets = portfolio.tickers().len(), "Loaded holdings");
    Ok(portfolio)
}

fn model_request(args: &ModelArgs) -> CliResult<ModelRequest> {
    let return_model = match args.return_model.as_str() {
        "mean" => ReturnModel::Mean,
        _ => ReturnModel::Median,
    };

    let model_weights = if args.weights.is_empty() {
        None
    } else {
        let mut weights = HashMap::new();
        for arg in &args.weights {
            let (label, weight) = arg
                .split_once('=')
                .ok_or_else(|| format!("invalid weight {:?}, expected LABEL=WEIGHT", arg))?;
            weights.insert(label.trim().to_string(), weight.trim().parse::<f64>()?);
        }
        Some(weights)
    };

    Ok(ModelRequest {
        market_tickers: args.market.clone(),
        ranges: args.ranges.clone(),
        return_model,
        common_factors: args.common,
        // Saves the separate prices call
        include_prices: true,
        model_weights,
    })
}

async fn load_with_models(portfolio: &PortfolioArgs, models: &ModelArgs) -> CliResult<Portfolio> {
    let mut portfolio = load(portfolio)?.with_model_method(models.method);
    portfolio.retrieve_models(&model_request(models)?).await?;
    Ok(portfolio)
}

fn trading_options(args: &FrontierArgs) -> TradingOptions {
    TradingOptions {
        short_sales: !args.no_short,
        buy: !args.no_buy,
        sell: !args.no_sell,
    }
}

fn parse_constraint(arg: &str) -> CliResult<(Vec<String>, Constraint)> {
    let parts: Vec<&str> = arg.split(':').map(str::trim).collect();
    let [tickers, function, sign, value, rest @ ..] = parts.as_slice() else {
        return Err(format!(
            "invalid constraint {:?}, expected TICKERS:FUNCTION:SIGN:VALUE[:UNIT]",
            arg
        )
        .into());
    };
    let unit = match rest {
        [] => ConstraintUnit::Shares,
        [unit] => unit.parse()?,
        _ => return Err(format!("invalid constraint {:?}", arg).into()),
    };

    let tickers = tickers
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    let constraint = Constraint::new(function.parse()?, sign.parse()?, value.parse::<f64>()?, unit);
    Ok((tickers, constraint))
}

async fn load_with_frontier(
    portfolio: &PortfolioArgs,
    models: &ModelArgs,
    frontier: &FrontierArgs,
) -> CliResult<Portfolio> {
    let mut portfolio = load_with_models(portfolio, models).await?;
    let options = trading_options(frontier);

    for arg in &frontier.constraints {
        let (tickers, constraint) = parse_constraint(arg)?;
        info!(tickers = ?tickers, %constraint, "Applying constraint");
        portfolio.apply_constraint(tickers.as_slice(), &constraint, options)?;
    }

    let params = FrontierParams {
        cashflow: frontier.cashflow,
        max_sales: frontier.max_sales,
        options,
        rho: frontier.rho,
    };
    portfolio.retrieve_frontier(&params).await?;
    Ok(portfolio)
}

fn by_ticker(tickers: &[String], values: impl IntoIterator<Item = f64>) -> Value {
    Value::Object(
        tickers
            .iter()
            .cloned()
            .zip(values.into_iter().map(Value::from))
            .collect::<Map<String, Value>>(),
    )
}

fn print_json(value: &Value) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Retrieve prices and print the holdings table
pub(crate) async fn prices(args: &PortfolioArgs, format: Format) -> CliResult<()> {
    let mut portfolio = load(args)?;
    let value = portfolio.retrieve_prices().await?;

    match format {
        Format::Json => {
            let holdings = portfolio.holdings().ok_or("no holdings")?;
            let prices = holdings.prices().ok_or("no prices")?;
            print_json(&json!({
                "value": value,
                "close": by_ticker(holdings.tickers(), prices.close.iter().copied()),
                "weight": by_ticker(holdings.tickers(), prices.weight.iter().copied()),
            }))
        }
        Format::Text => {
            println!("{}", portfolio.portfolio_dataframe()?);
            println!("Total value: {:.2}", value);
            Ok(())
        }
    }
}

/// Retrieve models and print per-asset statistics
pub(crate) async fn models(portfolio: &PortfolioArgs, models: &ModelArgs, format: Format) -> CliResult<()> {
    let portfolio = load_with_models(portfolio, models).await?;
    let model = portfolio.model()?;
    let (mu, std) = portfolio.return_and_variance()?;
    let (a, mu_star, sigma_0) = portfolio.unconstrained_frontier(1.0)?;

    match format {
        Format::Json => print_json(&json!({
            "method": portfolio.model_method(),
            "weights": portfolio.model_weights(),
            "return": by_ticker(portfolio.tickers(), model.r().iter().copied()),
            "std": by_ticker(portfolio.tickers(), model.std()?.iter().copied()),
            "portfolio": {"mu": mu, "std": std},
            "unconstrained": {"a": a, "mu_star": mu_star, "sigma_0": sigma_0},
        })),
        Format::Text => {
            println!("{}", portfolio.portfolio_dataframe()?);
            let mut weights: Vec<_> = portfolio.model_weights().into_iter().collect();
            weights.sort_by(|a, b| a.0.cmp(&b.0));
            for (label, weight) in weights {
                println!("Weight {:>6}: {:.3}", label, weight);
            }
            println!("Portfolio return: {:.4}, std: {:.4}", mu, std);
            println!(
                "Minimum-variance vertex: return {:.4}, std {:.4}",
                mu_star, sigma_0
            );
            Ok(())
        }
    }
}

/// Retrieve and print the efficient frontier
pub(crate) async fn frontier(
    portfolio: &PortfolioArgs,
    models: &ModelArgs,
    frontier: &FrontierArgs,
    format: Format,
) -> CliResult<()> {
    let portfolio = load_with_frontier(portfolio, models, frontier).await?;
    let points = portfolio.frontier().ok_or("no frontier")?.points();

    match format {
        Format::Json => print_json(&json!({
            "method": portfolio.frontier_method(),
            "points": points
                .iter()
                .map(|p| json!({
                    "mu": p.mu,
                    "std": p.std,
                    "x": by_ticker(portfolio.tickers(), p.x.iter().copied()),
                }))
                .collect::<Vec<_>>(),
        })),
        Format::Text => {
            println!("{:>10} {:>10}", "return", "std");
            for p in points {
                println!("{:>10.4} {:>10.4}", p.mu, p.std);
            }
            Ok(())
        }
    }
}

/// Recommended shares for an allocation
fn recommended_shares(portfolio: &Portfolio, recommendation: &Recommendation, cashflow: f64) -> Option<Vec<f64>> {
    let prices = portfolio.holdings().and_then(Holdings::prices)?;
    let value = portfolio.value() + cashflow;
    Some(
        recommendation
            .x
            .iter()
            .zip(prices.close.iter())
            .map(|(x, close)| x * value / close)
            .collect(),
    )
}

/// Retrieve the frontier and print a recommendation
pub(crate) async fn recommend(
    portfolio: &PortfolioArgs,
    models: &ModelArgs,
    frontier: &FrontierArgs,
    mu: Option<f64>,
    method: RecommendationMethod,
    format: Format,
) -> CliResult<()> {
    let portfolio = load_with_frontier(portfolio, models, frontier).await?;
    let recommendation = portfolio.retrieve_recommendation(mu, method).await?;
    let shares = recommended_shares(&portfolio, &recommendation, frontier.cashflow).unwrap_or_default();
    let tickers = portfolio.tickers();

    match format {
        Format::Json => print_json(&json!({
            "status": recommendation.status,
            "mu": recommendation.mu,
            "std": recommendation.std,
            "x": by_ticker(tickers, recommendation.x.iter().copied()),
            "shares": by_ticker(tickers, shares),
        })),
        Format::Text => {
            println!(
                "Recommendation ({}): return {:.4}, std {:.4}",
                recommendation.status, recommendation.mu, recommendation.std
            );
            for (i, ticker) in tickers.iter().enumerate() {
                let share = shares.get(i).copied().unwrap_or(f64::NAN);
                println!("{:>8} {:>8.4} {:>12.2}", ticker, recommendation.x[i], share);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimum::{ConstraintFunction, ConstraintSign};

    #[test]
    fn test_parse_constraint() {
        let (tickers, constraint) = parse_constraint("AAPL, MSFT:holdings:<=:100").unwrap();
        assert_eq!(tickers, ["AAPL", "MSFT"]);
        assert_eq!(constraint.function, ConstraintFunction::Holdings);
        assert_eq!(constraint.sign, ConstraintSign::LessOrEqual);
        assert_eq!(constraint.unit, ConstraintUnit::Shares);

        let (_, constraint) = parse_constraint("GOOG:sales:>=:5:percent value").unwrap();
        assert_eq!(constraint.unit, ConstraintUnit::PercentValue);

        assert!(parse_constraint("GOOG:holdings").is_err());
        assert!(parse_constraint("GOOG:holdings:=:1").is_err());
    }

    #[test]
    fn test_by_ticker() {
        let tickers = vec!["A".to_string(), "B".to_string()];
        assert_eq!(by_ticker(&tickers, [0.25, 0.75]), json!({"A": 0.25, "B": 0.75}));
    }
}
