//! Ticker table: shares, bounds and prices.

use crate::error::{PortfolioError, Result};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Column holding the ticker symbol
pub const TICKER_COLUMN: &str = "ticker";

/// Column holding the share count
pub const SHARES_COLUMN: &str = "shares";

/// Latest quote for one symbol as returned by the prices entry point
///
/// The service encodes each quote as a `[timestamp, close]` pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Quote(Value, Option<f64>);

impl Quote {
    /// Closing price
    pub const fn close(&self) -> Option<f64> {
        self.1
    }

    /// Quote time, from epoch seconds, epoch milliseconds or RFC 3339
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match &self.0 {
            Value::Number(n) => {
                let t = n.as_f64()?;
                // Larger values are milliseconds
                if t.abs() > 1e11 {
                    DateTime::from_timestamp_millis(t as i64)
                } else {
                    DateTime::from_timestamp(t as i64, 0)
                }
            }
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }
}

/// Prices and derived values, aligned with the ticker order
#[derive(Debug, Clone, PartialEq)]
pub struct Prices {
    /// Closing price per share
    pub close: Array1<f64>,
    /// Position value (`shares * close`)
    pub value: Array1<f64>,
    /// Position value as a fraction of the total
    pub weight: Array1<f64>,
    /// Quote time per ticker, if the service provided one
    pub timestamp: Vec<Option<DateTime<Utc>>>,
}

impl Prices {
    /// Total value of the positions
    pub fn total(&self) -> f64 {
        self.value.sum()
    }
}

/// Per-ticker holdings with bounds
///
/// Bounds are in shares. Fresh holdings are unbounded: `lower = -inf` and
/// `upper = +inf`.
#[derive(Debug, Clone, PartialEq)]
pub struct Holdings {
    tickers: Vec<String>,
    index: HashMap<String, usize>,
    shares: Array1<f64>,
    lower: Array1<f64>,
    upper: Array1<f64>,
    prices: Option<Prices>,
}

impl Holdings {
    /// Create holdings from (ticker, shares) pairs
    ///
    /// # Errors
    /// * `PortfolioError::DuplicateTicker` if a ticker appears twice
    pub fn new<S: Into<String>>(positions: impl IntoIterator<Item = (S, f64)>) -> Result<Self> {
        let mut tickers = Vec::new();
        let mut index = HashMap::new();
        let mut shares = Vec::new();

        for (ticker, count) in positions {
            let ticker: String = ticker.into();
            if index.insert(ticker.clone(), tickers.len()).is_some() {
                return Err(PortfolioError::DuplicateTicker(ticker));
            }
            tickers.push(ticker);
            shares.push(count);
        }

        let n = tickers.len();
        Ok(Self {
            tickers,
            index,
            shares: Array1::from(shares),
            lower: Array1::from_elem(n, f64::NEG_INFINITY),
            upper: Array1::from_elem(n, f64::INFINITY),
            prices: None,
        })
    }

    /// Read holdings from CSV
    ///
    /// Header names are trimmed. A `ticker` column is required; a missing
    /// `shares` column or an empty cell means zero shares. Other columns
    /// are ignored.
    ///
    /// # Errors
    /// * `PortfolioError::MissingColumn` without a `ticker` column
    /// * `PortfolioError::Parse` if a share count is not a number
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let ticker_col = headers
            .iter()
            .position(|h| h == TICKER_COLUMN)
            .ok_or_else(|| PortfolioError::MissingColumn(TICKER_COLUMN.to_string()))?;
        let shares_col = headers.iter().position(|h| h == SHARES_COLUMN);

        let mut positions = Vec::new();
        for record in reader.records() {
            let record = record?;
            let ticker = record.get(ticker_col).unwrap_or_default().to_string();
            if ticker.is_empty() {
                continue;
            }
            let shares = match shares_col.and_then(|c| record.get(c)) {
                Some(s) if !s.is_empty() => s.parse::<f64>().map_err(|e| {
                    PortfolioError::Parse(format!("shares of {} ({:?}): {}", ticker, s, e))
                })?,
                _ => 0.0,
            };
            positions.push((ticker, shares));
        }

        tracing::debug!(tickers = positions.len(), "imported holdings");
        Self::new(positions)
    }

    /// Read holdings from a CSV file
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Number of tickers
    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    /// Are there no tickers
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    /// Tickers in import order
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Current shares
    pub const fn shares(&self) -> &Array1<f64> {
        &self.shares
    }

    /// Lower bounds in shares
    pub const fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    /// Upper bounds in shares
    pub const fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    /// Prices, if retrieved
    pub const fn prices(&self) -> Option<&Prices> {
        self.prices.as_ref()
    }

    /// Total value, zero without prices
    pub fn value(&self) -> f64 {
        self.prices.as_ref().map_or(0.0, Prices::total)
    }

    /// Row positions of the given tickers
    ///
    /// # Errors
    /// * `PortfolioError::UnknownTicker` for a ticker not in the table
    pub fn positions<S: AsRef<str>>(&self, tickers: &[S]) -> Result<Vec<usize>> {
        tickers
            .iter()
            .map(|t| {
                let t = t.as_ref();
                self.index
                    .get(t)
                    .copied()
                    .ok_or_else(|| PortfolioError::UnknownTicker(t.to_string()))
            })
            .collect()
    }

    /// Update closing prices and recompute values and weights
    ///
    /// # Returns
    /// * Total portfolio value
    ///
    /// # Errors
    /// * `PortfolioError::MissingPrice` if a ticker has no usable quote
    pub fn update_prices(&mut self, quotes: &HashMap<String, Quote>) -> Result<f64> {
        let n = self.len();
        let mut close = Array1::zeros(n);
        let mut timestamp = Vec::with_capacity(n);

        for (i, ticker) in self.tickers.iter().enumerate() {
            let quote = quotes
                .get(ticker)
                .ok_or_else(|| PortfolioError::MissingPrice(ticker.clone()))?;
            close[i] = quote
                .close()
                .ok_or_else(|| PortfolioError::MissingPrice(ticker.clone()))?;
            timestamp.push(quote.timestamp());
        }

        let value = &self.shares * &close;
        let total = value.sum();
        let weight = if total != 0.0 {
            &value / total
        } else {
            tracing::warn!("Portfolio value is zero");
            Array1::zeros(n)
        };

        self.prices = Some(Prices {
            close,
            value,
            weight,
            timestamp,
        });
        Ok(total)
    }

    /// Tighten bounds at `positions`
    ///
    /// New lower bounds merge with `max`, new upper bounds with `min`, so
    /// bounds never loosen.
    pub(crate) fn tighten(
        &mut self,
        positions: &[usize],
        lower: Option<&Array1<f64>>,
        upper: Option<&Array1<f64>>,
    ) {
        for (j, &i) in positions.iter().enumerate() {
            if let Some(lower) = lower {
                self.lower[i] = self.lower[i].max(lower[j]);
            }
            if let Some(upper) = upper {
                self.upper[i] = self.upper[i].min(upper[j]);
            }
        }
    }

    /// Reset bounds at `positions` to unbounded
    pub(crate) fn reset_bounds(&mut self, positions: &[usize]) {
        for &i in positions {
            self.lower[i] = f64::NEG_INFINITY;
            self.upper[i] = f64::INFINITY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn quotes(value: Value) -> HashMap<String, Quote> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_csv_import() {
        let data = "ticker , shares\nAAPL, 1\nMSFT,10\nAMZN,\nGOOG,13\n";
        let holdings = Holdings::from_csv_reader(data.as_bytes()).unwrap();

        assert_eq!(holdings.tickers(), ["AAPL", "MSFT", "AMZN", "GOOG"]);
        assert_eq!(holdings.shares().to_vec(), vec![1.0, 10.0, 0.0, 13.0]);
        assert!(holdings.lower().iter().all(|&l| l == f64::NEG_INFINITY));
        assert!(holdings.upper().iter().all(|&u| u == f64::INFINITY));
        assert!(holdings.prices().is_none());
    }

    #[test]
    fn test_csv_without_shares_column() {
        let data = "ticker,sector\nAAPL,tech\nXOM,energy\n";
        let holdings = Holdings::from_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(holdings.shares().to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_csv_requires_ticker() {
        let data = "symbol,shares\nAAPL,1\n";
        let err = Holdings::from_csv_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, PortfolioError::MissingColumn(c) if c == "ticker"));
    }

    #[test]
    fn test_csv_bad_shares() {
        let data = "ticker,shares\nAAPL,many\n";
        let err = Holdings::from_csv_reader(data.as_bytes()).unwrap_err();
        assert!(matches!(err, PortfolioError::Parse(_)));
    }

    #[test]
    fn test_duplicate_ticker() {
        let err = Holdings::new([("A", 1.0), ("A", 2.0)]).unwrap_err();
        assert!(matches!(err, PortfolioError::DuplicateTicker(t) if t == "A"));
    }

    #[test]
    fn test_update_prices() {
        let mut holdings = Holdings::new([("A", 1.0), ("B", 10.0), ("C", 0.0)]).unwrap();
        let total = holdings
            .update_prices(&quotes(json!({
                "A": [1700000000, 100.0],
                "B": ["2024-01-02T21:00:00Z", 20.0],
                "C": [null, 5.0],
            })))
            .unwrap();

        assert_abs_diff_eq!(total, 300.0, epsilon = 1e-12);
        assert_abs_diff_eq!(holdings.value(), 300.0, epsilon = 1e-12);

        let prices = holdings.prices().unwrap();
        assert_eq!(prices.value.to_vec(), vec![100.0, 200.0, 0.0]);
        assert_abs_diff_eq!(prices.weight.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(prices.weight[0], 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(
            prices.timestamp[0],
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert!(prices.timestamp[1].is_some());
        assert!(prices.timestamp[2].is_none());
    }

    #[test]
    fn test_update_prices_missing_ticker() {
        let mut holdings = Holdings::new([("A", 1.0), ("B", 1.0)]).unwrap();
        let err = holdings
            .update_prices(&quotes(json!({"A": [0, 1.0], "B": [0, null]})))
            .unwrap_err();
        assert!(matches!(err, PortfolioError::MissingPrice(t) if t == "B"));
        assert!(holdings.prices().is_none());
    }

    #[test]
    fn test_tighten_never_loosens() {
        let mut holdings = Holdings::new([("A", 5.0), ("B", 5.0)]).unwrap();
        let positions = holdings.positions(&["B"]).unwrap();

        holdings.tighten(&positions, Some(&Array1::from(vec![2.0])), Some(&Array1::from(vec![8.0])));
        holdings.tighten(&positions, Some(&Array1::from(vec![1.0])), Some(&Array1::from(vec![9.0])));
        assert_eq!(holdings.lower()[1], 2.0);
        assert_eq!(holdings.upper()[1], 8.0);
        assert_eq!(holdings.lower()[0], f64::NEG_INFINITY);

        holdings.reset_bounds(&positions);
        assert_eq!(holdings.lower()[1], f64::NEG_INFINITY);
        assert_eq!(holdings.upper()[1], f64::INFINITY);
    }

    #[test]
    fn test_unknown_ticker() {
        let holdings = Holdings::new([("A", 1.0)]).unwrap();
        assert!(matches!(
            holdings.positions(&["Z"]),
            Err(PortfolioError::UnknownTicker(t)) if t == "Z"
        ));
    }
}
