//! Request construction for the model and optimization services.

use crate::constraints::TradingOptions;
use crate::error::{PortfolioError, Result};
use crate::holdings::Holdings;
use ndarray::{Array1, Array2};
use optimum_model::{FieldValue, Model, ModelField};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Model fields sent to the solver
const QUERY_FIELDS: [ModelField; 4] = [ModelField::R, ModelField::Q, ModelField::D, ModelField::F];

/// Parameters of a frontier request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierParams {
    /// Cash added to (positive) or withdrawn from (negative) the portfolio
    pub cashflow: f64,
    /// Largest total value that may be sold
    pub max_sales: f64,
    /// Trading restrictions
    pub options: TradingOptions,
    /// Regularization weight; only sent when positive
    pub rho: f64,
}

impl Default for FrontierParams {
    fn default() -> Self {
        Self {
            cashflow: 0.0,
            max_sales: 0.0,
            options: TradingOptions::default(),
            rho: 0.0,
        }
    }
}

/// Statistic used to estimate expected returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnModel {
    /// Median of historical returns
    #[default]
    Median,
    /// Mean of historical returns
    Mean,
}

/// Parameters of a model request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRequest {
    /// Market index tickers used as factors
    pub market_tickers: Vec<String>,
    /// Estimation ranges, e.g. `1mo`, `6mo`, `1y`
    pub ranges: Vec<String>,
    /// Return statistic
    pub return_model: ReturnModel,
    /// Use factors common to all ranges
    pub common_factors: bool,
    /// Also return prices, saving a separate prices call
    pub include_prices: bool,
    /// Weight per range; uniform when absent
    pub model_weights: Option<HashMap<String, f64>>,
}

impl Default for ModelRequest {
    fn default() -> Self {
        Self {
            market_tickers: vec!["^DJI".to_string()],
            ranges: vec!["1mo".to_string(), "6mo".to_string(), "1y".to_string()],
            return_model: ReturnModel::default(),
            common_factors: false,
            include_prices: false,
            model_weights: None,
        }
    }
}

impl ModelRequest {
    /// Payload for the `model` entry point
    pub fn payload(&self, tickers: &[String]) -> Value {
        json!({
            "tickers": tickers,
            "market": self.market_tickers,
            "range": self.ranges,
            "options": {
                "common": self.common_factors,
                "return_model": self.return_model,
                "include_prices": self.include_prices,
            },
        })
    }
}

/// Payload for the `prices` entry point
pub fn prices_payload(tickers: &[String]) -> Value {
    json!({ "symbols": tickers })
}

/// Linear constraint passed through to the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConstraint {
    /// Constraint label
    pub label: String,
    /// Solver function name
    pub function: String,
    /// Bound on the function, as a fraction of portfolio value
    pub bounds: f64,
}

/// Solver request for a frontier or a single portfolio
///
/// Allocations and bounds are fractions of portfolio value. Unbounded
/// entries of `xlo`/`xup` encode as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioQuery {
    /// Expected returns
    pub r: Vec<f64>,
    /// Normalized idiosyncratic variances
    #[serde(rename = "Q")]
    pub q: Vec<f64>,
    /// Normalized factor covariance
    #[serde(rename = "D")]
    pub d: Vec<Vec<f64>>,
    /// Factor loadings
    #[serde(rename = "F")]
    pub f: Vec<Vec<f64>>,
    /// Regularization weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rho: Option<f64>,
    /// Current allocation
    pub x0: Vec<f64>,
    /// Cashflow relative to current value
    pub cashflow: f64,
    /// Trading restrictions
    pub options: TradingOptions,
    /// Linear constraints
    pub constraints: Vec<QueryConstraint>,
    /// Lower bounds relative to post-cashflow value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xlo: Option<Vec<Option<f64>>>,
    /// Upper bounds relative to post-cashflow value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xup: Option<Vec<Option<f64>>>,
    /// Target return, for a single-portfolio request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mu: Option<f64>,
}

impl PortfolioQuery {
    /// Copy of the query fixing the target return
    pub fn with_target(&self, mu: f64) -> Self {
        Self {
            mu: Some(mu),
            ..self.clone()
        }
    }
}

/// Assemble the solver request
///
/// # Arguments
/// * `model` - Combined model
/// * `holdings` - Holdings with prices and bounds
/// * `params` - Cashflow, sales limit, trading options and regularization
///
/// # Errors
/// * `PortfolioError::MissingPrices` without prices
/// * `PortfolioError::ZeroValue` if the portfolio is worth nothing
pub fn build_query(model: &Model, holdings: &Holdings, params: &FrontierParams) -> Result<PortfolioQuery> {
    let prices = holdings.prices().ok_or(PortfolioError::MissingPrices)?;
    let value0 = prices.total();
    if value0 == 0.0 {
        return Err(PortfolioError::ZeroValue);
    }
    let value = value0 + params.cashflow;

    let mut r = Vec::new();
    let mut q = Vec::new();
    let mut d = Vec::new();
    let mut f = Vec::new();
    for (field, field_value) in model.to_dict(Some(QUERY_FIELDS.as_slice()), true)? {
        match (field, field_value) {
            (ModelField::R, FieldValue::Vector(v)) => r = v.to_vec(),
            (ModelField::Q, FieldValue::Vector(v)) => q = v.to_vec(),
            (ModelField::D, FieldValue::Matrix(m)) => d = rows(&m),
            (ModelField::F, FieldValue::Matrix(m)) => f = rows(&m),
            _ => {}
        }
    }

    let relative_bounds = |bounds: &Array1<f64>| {
        bounds
            .iter()
            .any(|b| b.is_finite())
            .then(|| {
                (bounds * &prices.close / value)
                    .iter()
                    .map(|&b| b.is_finite().then_some(b))
                    .collect::<Vec<_>>()
            })
    };

    Ok(PortfolioQuery {
        r,
        q,
        d,
        f,
        rho: (params.rho > 0.0).then_some(params.rho),
        x0: prices.weight.to_vec(),
        cashflow: params.cashflow / value0,
        options: params.options,
        constraints: vec![QueryConstraint {
            label: "sales".to_string(),
            function: "sales".to_string(),
            bounds: params.max_sales / value0,
        }],
        xlo: relative_bounds(holdings.lower()),
        xup: relative_bounds(holdings.upper()),
        mu: None,
    })
}

fn rows(m: &Array2<f64>) -> Vec<Vec<f64>> {
    m.rows().into_iter().map(|row| row.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holdings::Quote;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use optimum_model::Covariance;

    fn model() -> Model {
        Model::new(
            array![0.1, 0.2],
            array![[1.0], [0.5]],
            array![0.01, 0.04],
            Covariance::Direct(array![[0.04]]),
        )
        .unwrap()
    }

    fn priced_holdings() -> Holdings {
        let mut holdings = Holdings::new([("A", 10.0), ("B", 30.0)]).unwrap();
        let quotes: HashMap<String, Quote> =
            serde_json::from_value(json!({"A": [0, 5.0], "B": [0, 5.0]})).unwrap();
        holdings.update_prices(&quotes).unwrap();
        holdings
    }

    #[test]
    fn test_requires_prices() {
        let holdings = Holdings::new([("A", 10.0), ("B", 30.0)]).unwrap();
        let err = build_query(&model(), &holdings, &FrontierParams::default()).unwrap_err();
        assert!(matches!(err, PortfolioError::MissingPrices));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_query_fields() {
        let params = FrontierParams {
            cashflow: 100.0,
            max_sales: 50.0,
            ..FrontierParams::default()
        };
        let query = build_query(&model(), &priced_holdings(), &params).unwrap();

        assert_eq!(query.r, vec![0.1, 0.2]);
        assert_eq!(query.f, vec![vec![1.0], vec![0.5]]);
        assert_eq!(query.x0, vec![0.25, 0.75]);
        assert_abs_diff_eq!(query.cashflow, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(query.constraints[0].bounds, 0.25, epsilon = 1e-12);
        assert!(query.rho.is_none());
        assert!(query.xlo.is_none() && query.xup.is_none());

        // Risk terms scaled by the largest asset variance (0.05)
        assert_abs_diff_eq!(query.q[0], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(query.d[0][0], 0.8, epsilon = 1e-12);

        let payload = serde_json::to_value(&query).unwrap();
        assert_eq!(payload["options"], json!({"short": true, "buy": true, "sell": true}));
        assert!(payload.get("rho").is_none());
        assert!(payload.get("xlo").is_none());
        assert!(payload.get("mu").is_none());
        assert_eq!(payload["constraints"][0]["function"], "sales");
    }

    #[test]
    fn test_bounds_relative_to_post_cashflow_value() {
        let mut holdings = priced_holdings();
        let positions = holdings.positions(&["A"]).unwrap();
        holdings.tighten(&positions, None, Some(&Array1::from(vec![20.0])));

        let params = FrontierParams {
            cashflow: 200.0,
            rho: 0.5,
            ..FrontierParams::default()
        };
        let query = build_query(&model(), &holdings, &params).unwrap();

        assert!(query.xlo.is_none());
        assert_eq!(query.xup, Some(vec![Some(0.25), None]));
        assert_eq!(query.rho, Some(0.5));

        let payload = serde_json::to_value(query.with_target(0.15)).unwrap();
        assert_eq!(payload["xup"], json!([0.25, null]));
        assert_eq!(payload["mu"], json!(0.15));
        assert_eq!(payload["rho"], json!(0.5));
    }

    #[test]
    fn test_zero_value() {
        let mut holdings = Holdings::new([("A", 0.0)]).unwrap();
        let quotes: HashMap<String, Quote> =
            serde_json::from_value(json!({"A": [0, 5.0]})).unwrap();
        holdings.update_prices(&quotes).unwrap();
        let err = build_query(&model(), &holdings, &FrontierParams::default());
        assert!(matches!(err, Err(PortfolioError::ZeroValue)));
    }

    #[test]
    fn test_model_payload() {
        let request = ModelRequest {
            include_prices: true,
            return_model: ReturnModel::Mean,
            ..ModelRequest::default()
        };
        let payload = request.payload(&["A".to_string()]);
        assert_eq!(payload["tickers"], json!(["A"]));
        assert_eq!(payload["market"], json!(["^DJI"]));
        assert_eq!(payload["range"], json!(["1mo", "6mo", "1y"]));
        assert_eq!(
            payload["options"],
            json!({"common": false, "return_model": "mean", "include_prices": true})
        );
        assert_eq!(prices_payload(&["A".to_string()]), json!({"symbols": ["A"]}));
    }
}
