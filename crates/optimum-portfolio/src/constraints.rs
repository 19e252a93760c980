//! Constraint engine: maps constraint specifications to share bounds.
//!
//! A [`Constraint`] names what is being bounded (sales, purchases, short
//! sales or total holdings), the direction of the bound, its value and the
//! unit the value is expressed in. [`constraint_bounds`] converts it into
//! lower/upper bounds in shares, pivoting on the current holdings, and
//! applies the [`TradingOptions`] clamps. Bounds are merged into the
//! portfolio by intersection, so they only ever tighten.

use crate::error::{PortfolioError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quantity being bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintFunction {
    /// Shares sold relative to current holdings
    #[serde(rename = "sales")]
    Sales,
    /// Shares bought relative to current holdings
    #[serde(rename = "purchases")]
    Purchases,
    /// Size of a short position
    #[serde(rename = "short sales")]
    ShortSales,
    /// Total position
    #[serde(rename = "holdings")]
    Holdings,
}

impl ConstraintFunction {
    /// Name of the function
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Purchases => "purchases",
            Self::ShortSales => "short sales",
            Self::Holdings => "holdings",
        }
    }
}

impl fmt::Display for ConstraintFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConstraintFunction {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "sales" => Ok(Self::Sales),
            "purchases" => Ok(Self::Purchases),
            "short sales" => Ok(Self::ShortSales),
            "holdings" => Ok(Self::Holdings),
            _ => Err(PortfolioError::Parse(format!(
                "unknown constraint function: {}",
                s
            ))),
        }
    }
}

/// Direction of a bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintSign {
    /// Function is at most the value
    #[serde(rename = "\u{2264}", alias = "<=")]
    LessOrEqual,
    /// Function is at least the value
    #[serde(rename = "\u{2265}", alias = ">=")]
    GreaterOrEqual,
}

impl ConstraintSign {
    /// Mathematical symbol of the sign
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::LessOrEqual => "\u{2264}",
            Self::GreaterOrEqual => "\u{2265}",
        }
    }
}

impl fmt::Display for ConstraintSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ConstraintSign {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "\u{2264}" | "<=" | "le" => Ok(Self::LessOrEqual),
            "\u{2265}" | ">=" | "ge" => Ok(Self::GreaterOrEqual),
            _ => Err(PortfolioError::Parse(format!("unknown constraint sign: {}", s))),
        }
    }
}

/// Unit of a constraint value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintUnit {
    /// Number of shares
    #[serde(rename = "shares")]
    Shares,
    /// Dollar value, converted with the closing price
    #[serde(rename = "value")]
    Value,
    /// Percent of the current position
    #[serde(rename = "percent value")]
    PercentValue,
}

impl ConstraintUnit {
    /// Name of the unit
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Shares => "shares",
            Self::Value => "value",
            Self::PercentValue => "percent value",
        }
    }
}

impl fmt::Display for ConstraintUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConstraintUnit {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "shares" => Ok(Self::Shares),
            "value" => Ok(Self::Value),
            "percent value" | "percent" => Ok(Self::PercentValue),
            _ => Err(PortfolioError::Parse(format!("unknown constraint unit: {}", s))),
        }
    }
}

/// Trading restrictions
///
/// Serializes with the keys the solver expects (`short`, `buy`, `sell`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingOptions {
    /// Allow negative positions
    #[serde(rename = "short")]
    pub short_sales: bool,
    /// Allow increasing positions
    pub buy: bool,
    /// Allow decreasing positions
    pub sell: bool,
}

impl Default for TradingOptions {
    fn default() -> Self {
        Self {
            short_sales: true,
            buy: true,
            sell: true,
        }
    }
}

/// Constraint value, either shared by all tickers or one per ticker
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintValue {
    /// Same value for every ticker
    Uniform(f64),
    /// One value per ticker, in ticker order
    PerTicker(Vec<f64>),
}

impl ConstraintValue {
    /// Broadcast to `n` values
    fn broadcast(&self, n: usize) -> Result<Array1<f64>> {
        match self {
            Self::Uniform(v) => Ok(Array1::from_elem(n, *v)),
            Self::PerTicker(values) if values.len() == n => Ok(Array1::from(values.clone())),
            Self::PerTicker(values) => Err(PortfolioError::LengthMismatch {
                expected: n,
                actual: values.len(),
            }),
        }
    }
}

impl From<f64> for ConstraintValue {
    fn from(value: f64) -> Self {
        Self::Uniform(value)
    }
}

impl From<Vec<f64>> for ConstraintValue {
    fn from(values: Vec<f64>) -> Self {
        Self::PerTicker(values)
    }
}

impl From<&[f64]> for ConstraintValue {
    fn from(values: &[f64]) -> Self {
        Self::PerTicker(values.to_vec())
    }
}

/// A bound on one function of the selected positions
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Quantity being bounded
    pub function: ConstraintFunction,
    /// Direction of the bound
    pub sign: ConstraintSign,
    /// Bound value
    pub value: ConstraintValue,
    /// Unit of `value`
    pub unit: ConstraintUnit,
}

impl Constraint {
    /// Create a constraint
    pub fn new(
        function: ConstraintFunction,
        sign: ConstraintSign,
        value: impl Into<ConstraintValue>,
        unit: ConstraintUnit,
    ) -> Self {
        Self {
            function,
            sign,
            value: value.into(),
            unit,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ConstraintValue::Uniform(v) => {
                write!(f, "{} {} {} {}", self.function, self.sign, v, self.unit)
            }
            ConstraintValue::PerTicker(values) => {
                write!(f, "{} {} {:?} {}", self.function, self.sign, values, self.unit)
            }
        }
    }
}

/// Bounds in shares produced by one constraint
///
/// A side is `None` when the constraint does not touch it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounds {
    /// Lower bounds
    pub lower: Option<Array1<f64>>,
    /// Upper bounds
    pub upper: Option<Array1<f64>>,
}

/// Compute the share bounds implied by a constraint
///
/// # Arguments
/// * `shares` - Current shares of the constrained tickers
/// * `close` - Closing prices of the constrained tickers, required for
///   `ConstraintUnit::Value`
/// * `constraint` - The constraint
/// * `options` - Trading restrictions, applied as clamps in the order
///   short sales, buy, sell
///
/// # Errors
/// * `PortfolioError::MissingPrices` for a value constraint without prices
/// * `PortfolioError::LengthMismatch` if per-ticker values do not match
///   `shares`
pub fn constraint_bounds(
    shares: &Array1<f64>,
    close: Option<&Array1<f64>>,
    constraint: &Constraint,
    options: TradingOptions,
) -> Result<Bounds> {
    use ConstraintFunction as Function;
    use ConstraintSign as Sign;

    let value = constraint.value.broadcast(shares.len())?;

    let value = match constraint.unit {
        ConstraintUnit::Shares => value,
        ConstraintUnit::Value => {
            let close = close.ok_or(PortfolioError::MissingPrices)?;
            value / close
        }
        ConstraintUnit::PercentValue => value * shares / 100.0,
    };

    let (lower, upper) = match (constraint.function, constraint.sign) {
        (Function::Sales, Sign::LessOrEqual) => (Some(shares - &value), None),
        (Function::Sales, Sign::GreaterOrEqual) => (None, Some(shares - &value)),
        (Function::Purchases, Sign::LessOrEqual) => (None, Some(shares + &value)),
        (Function::Purchases, Sign::GreaterOrEqual) => (Some(shares + &value), None),
        (Function::ShortSales, Sign::LessOrEqual) => (Some(-value), None),
        (Function::ShortSales, Sign::GreaterOrEqual) => (None, Some(-value)),
        (Function::Holdings, Sign::LessOrEqual) => (None, Some(value)),
        (Function::Holdings, Sign::GreaterOrEqual) => (Some(value), None),
    };

    let clamp = |bound: Array1<f64>| clamp_bound(bound, shares, options);
    Ok(Bounds {
        lower: lower.map(clamp),
        upper: upper.map(clamp),
    })
}

fn clamp_bound(mut bound: Array1<f64>, shares: &Array1<f64>, options: TradingOptions) -> Array1<f64> {
    if !options.short_sales {
        bound.mapv_inplace(|b| if b > 0.0 { b } else { 0.0 });
    }
    if !options.buy {
        bound.zip_mut_with(shares, |b, &s| {
            if *b > s {
                *b = s;
            }
        });
    }
    if !options.sell {
        bound.zip_mut_with(shares, |b, &s| {
            if *b < s {
                *b = s;
            }
        });
    }
    bound
}
