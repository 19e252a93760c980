//! Portfolio state and the retrieval workflow.
//!
//! Typical usage: import holdings, retrieve prices and models, tighten
//! bounds with constraints, retrieve the frontier and ask for a
//! recommendation. Every retrieval checks its preconditions before calling
//! out, so callers must sequence the calls themselves.

use crate::constraints::{Constraint, TradingOptions, constraint_bounds};
use crate::error::{PortfolioError, Result};
use crate::frontier::{
    Frontier, FrontierMethod, FrontierResponse, Recommendation, RecommendationMethod, Solution,
};
use crate::holdings::{Holdings, Prices, Quote};
use crate::query::{FrontierParams, ModelRequest, PortfolioQuery, build_query, prices_payload};
use crate::report;
use ndarray::Array1;
use optimum_client::{ApiClient, ClientConfig, EntryPoint, HttpClient, MODELS_API, OPTIMIZE_API};
use optimum_model::{Model, ModelMethod, ModelSet};
use polars::prelude::DataFrame;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Portfolio with its models and frontier
///
/// Owns the holdings table, the per-range models and the frontier. Not
/// meant to be shared between concurrent writers.
pub struct Portfolio {
    portfolio_client: Arc<dyn ApiClient>,
    model_client: Arc<dyn ApiClient>,
    model_method: ModelMethod,
    models: ModelSet,
    holdings: Option<Holdings>,
    frontier: Option<Frontier>,
}

impl Portfolio {
    /// Create an empty portfolio
    ///
    /// # Arguments
    /// * `portfolio_client` - Client for the `frontier` and `portfolio`
    ///   entry points
    /// * `model_client` - Client for the `prices` and `model` entry points
    pub fn new(portfolio_client: Arc<dyn ApiClient>, model_client: Arc<dyn ApiClient>) -> Self {
        Self {
            portfolio_client,
            model_client,
            model_method: ModelMethod::default(),
            models: ModelSet::default(),
            holdings: None,
            frontier: None,
        }
    }

    /// Create a portfolio talking to the live services
    ///
    /// Credentials are read from the environment, see
    /// [`ClientConfig::from_env`].
    pub fn from_env() -> Result<Self> {
        let portfolio_client = HttpClient::new(ClientConfig::from_env(OPTIMIZE_API))?;
        let model_client = HttpClient::new(ClientConfig::from_env(MODELS_API))?;
        Ok(Self::new(Arc::new(portfolio_client), Arc::new(model_client)))
    }

    /// Use a model combination method
    pub fn with_model_method(mut self, method: ModelMethod) -> Self {
        self.model_method = method;
        self
    }

    // Holdings

    /// Replace the holdings
    ///
    /// Invalidates models and frontier.
    pub fn import_holdings(&mut self, holdings: Holdings) {
        tracing::info!(tickers = holdings.len(), "imported portfolio");
        self.holdings = Some(holdings);
        self.invalidate_models();
    }

    /// Import holdings from CSV, see [`Holdings::from_csv_reader`]
    pub fn import_csv<R: Read>(&mut self, reader: R) -> Result<()> {
        self.import_holdings(Holdings::from_csv_reader(reader)?);
        Ok(())
    }

    /// Import holdings from a CSV file
    pub fn import_csv_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.import_holdings(Holdings::from_csv_path(path)?);
        Ok(())
    }

    /// Holdings, if imported
    pub const fn holdings(&self) -> Option<&Holdings> {
        self.holdings.as_ref()
    }

    /// Tickers in import order
    pub fn tickers(&self) -> &[String] {
        self.holdings
            .as_ref()
            .map(Holdings::tickers)
            .unwrap_or_default()
    }

    /// Total value, zero without prices
    pub fn value(&self) -> f64 {
        self.holdings.as_ref().map_or(0.0, Holdings::value)
    }

    /// Have prices been retrieved
    pub fn has_prices(&self) -> bool {
        self.holdings.as_ref().is_some_and(|h| h.prices().is_some())
    }

    fn holdings_ref(&self) -> Result<&Holdings> {
        self.holdings.as_ref().ok_or(PortfolioError::NoHoldings)
    }

    fn holdings_mut(&mut self) -> Result<&mut Holdings> {
        self.holdings.as_mut().ok_or(PortfolioError::NoHoldings)
    }

    fn prices(&self) -> Result<&Prices> {
        self.holdings_ref()?
            .prices()
            .ok_or(PortfolioError::MissingPrices)
    }

    // Models

    /// Have models been retrieved
    pub fn has_models(&self) -> bool {
        !self.models.is_empty()
    }

    /// Drop the models and the frontier built on them
    pub fn invalidate_models(&mut self) {
        self.models = ModelSet::default();
        self.invalidate_frontier();
    }

    /// Models per range
    pub const fn models(&self) -> &ModelSet {
        &self.models
    }

    /// Replace the models
    ///
    /// Without `weights` every range gets the same weight. Invalidates the
    /// frontier.
    pub fn set_models(
        &mut self,
        models: impl IntoIterator<Item = (String, Model)>,
        weights: Option<&HashMap<String, f64>>,
    ) -> Result<()> {
        self.models = ModelSet::new(models, weights)?;
        self.invalidate_frontier();
        Ok(())
    }

    /// Normalized weight per range
    pub fn model_weights(&self) -> HashMap<String, f64> {
        self.models.weights()
    }

    /// Change the range weights
    ///
    /// An existing frontier is kept and rescored with the new combined
    /// model, which makes it approximate. On error nothing changes.
    ///
    /// # Errors
    /// * `PortfolioError::MissingModels` without models
    /// * `ModelError::WeightKeyMismatch` or `ModelError::NegativeWeight`
    ///   for invalid weights
    pub fn set_models_weights(&mut self, weights: &HashMap<String, f64>) -> Result<()> {
        if !self.has_models() {
            return Err(PortfolioError::MissingModels);
        }
        let mut models = self.models.clone();
        models.set_weights(weights)?;
        self.commit_models(models, self.model_method)?;
        tracing::debug!(?weights, "updated model weights");
        Ok(())
    }

    /// Method used to combine the per-range models
    pub const fn model_method(&self) -> ModelMethod {
        self.model_method
    }

    /// Change the model combination method
    ///
    /// An existing frontier is rescored, as for a weight change. On error
    /// nothing changes.
    pub fn set_model_method(&mut self, method: ModelMethod) -> Result<()> {
        self.commit_models(self.models.clone(), method)
    }

    /// Rescore the frontier against `models` combined with `method`, then
    /// store all three
    fn commit_models(&mut self, models: ModelSet, method: ModelMethod) -> Result<()> {
        let frontier = self
            .frontier
            .as_ref()
            .map(|frontier| -> Result<Frontier> {
                let mut frontier = frontier.clone();
                frontier.rescore(&models.combine(method)?)?;
                Ok(frontier)
            })
            .transpose()?;

        self.models = models;
        self.model_method = method;
        self.frontier = frontier;
        Ok(())
    }

    /// Combined model
    ///
    /// # Errors
    /// * `PortfolioError::MissingModels` without models
    pub fn model(&self) -> Result<Model> {
        if !self.has_models() {
            return Err(PortfolioError::MissingModels);
        }
        Ok(self.models.combine(self.model_method)?)
    }

    /// Expected return and standard deviation of the current allocation
    pub fn return_and_variance(&self) -> Result<(f64, f64)> {
        let prices = self.prices()?;
        let model = self.model()?;
        Ok(model.return_and_variance(&prices.weight)?)
    }

    /// Closed-form unconstrained frontier of the combined model
    ///
    /// # Returns
    /// * (a, mu_star, sigma_0), see [`Model::unconstrained_frontier`]
    pub fn unconstrained_frontier(&self, x_bar: f64) -> Result<(f64, f64, f64)> {
        Ok(self.model()?.unconstrained_frontier(x_bar)?)
    }

    // Constraints

    /// Tighten the bounds of `tickers` with a constraint
    ///
    /// Bounds only ever tighten; use [`Portfolio::remove_constraints`] to
    /// start over. An empty ticker list does nothing.
    ///
    /// # Errors
    /// * `PortfolioError::UnknownTicker` for a ticker not in the portfolio
    /// * `PortfolioError::MissingPrices` for a value constraint without
    ///   prices
    pub fn apply_constraint<S: AsRef<str>>(
        &mut self,
        tickers: &[S],
        constraint: &Constraint,
        options: TradingOptions,
    ) -> Result<()> {
        if tickers.is_empty() {
            return Ok(());
        }

        let holdings = self.holdings_mut()?;
        let positions = holdings.positions(tickers)?;
        let shares: Array1<f64> = positions.iter().map(|&i| holdings.shares()[i]).collect();
        let close: Option<Array1<f64>> = holdings
            .prices()
            .map(|p| positions.iter().map(|&i| p.close[i]).collect());

        let bounds = constraint_bounds(&shares, close.as_ref(), constraint, options)?;
        holdings.tighten(&positions, bounds.lower.as_ref(), bounds.upper.as_ref());

        tracing::debug!(%constraint, tickers = tickers.len(), "applied constraint");
        Ok(())
    }

    /// Reset the bounds of `tickers` to unbounded
    pub fn remove_constraints<S: AsRef<str>>(&mut self, tickers: &[S]) -> Result<()> {
        if tickers.is_empty() {
            return Ok(());
        }
        let holdings = self.holdings_mut()?;
        let positions = holdings.positions(tickers)?;
        holdings.reset_bounds(&positions);
        Ok(())
    }

    // Frontier

    /// Has a frontier been retrieved
    pub const fn has_frontier(&self) -> bool {
        self.frontier.is_some()
    }

    /// Drop the frontier and its query
    pub fn invalidate_frontier(&mut self) {
        self.frontier = None;
    }

    /// Frontier, if retrieved
    pub const fn frontier(&self) -> Option<&Frontier> {
        self.frontier.as_ref()
    }

    /// Provenance of the frontier
    pub fn frontier_method(&self) -> FrontierMethod {
        self.frontier
            .as_ref()
            .map_or(FrontierMethod::None, Frontier::method)
    }

    /// Query that produced the frontier
    pub fn frontier_query_params(&self) -> Option<&PortfolioQuery> {
        self.frontier.as_ref().map(Frontier::query)
    }

    /// Range of the frontier, see [`Frontier::range`]
    pub fn frontier_range(&self) -> Result<((f64, f64), (f64, f64))> {
        self.frontier
            .as_ref()
            .map(Frontier::range)
            .ok_or(PortfolioError::MissingFrontier)
    }

    /// Range of returns and risks over the assets and the frontier
    ///
    /// # Returns
    /// * ((mu min, mu max), (std min, std max))
    pub fn range(&self) -> Result<((f64, f64), (f64, f64))> {
        let model = self.model()?;
        let (mut mu, mut std) = (min_max(model.r().iter()), min_max(model.std()?.iter()));

        if let Some(frontier) = &self.frontier {
            let ((mu_first, mu_last), (std_first, std_last)) = frontier.range();
            mu = min_max([mu.0, mu.1, mu_first, mu_last].iter());
            std = min_max([std.0, std.1, std_first, std_last].iter());
        }
        Ok((mu, std))
    }

    // Retrieval

    /// Retrieve closing prices for all tickers
    ///
    /// # Returns
    /// * Total portfolio value
    pub async fn retrieve_prices(&mut self) -> Result<f64> {
        let payload = prices_payload(self.holdings_ref()?.tickers());
        tracing::info!("retrieving prices");

        let response = self.model_client.call(EntryPoint::Prices, payload).await?;
        let quotes: HashMap<String, Quote> = serde_json::from_value(response)?;
        let total = self.holdings_mut()?.update_prices(&quotes)?;

        tracing::info!(value = total, "retrieved prices");
        Ok(total)
    }

    /// Retrieve one model per range
    ///
    /// With `include_prices` the response also carries prices, which are
    /// applied as by [`Portfolio::retrieve_prices`]. Replaces the models
    /// and invalidates the frontier.
    pub async fn retrieve_models(&mut self, request: &ModelRequest) -> Result<()> {
        let holdings = self.holdings_ref()?;
        let n_assets = holdings.len();
        let payload = request.payload(holdings.tickers());
        tracing::info!(ranges = ?request.ranges, market = ?request.market_tickers, "retrieving models");

        let response = self.model_client.call(EntryPoint::Model, payload).await?;
        let Value::Object(mut entries) = response else {
            return Err(PortfolioError::MalformedResponse(
                "model response is not an object".to_string(),
            ));
        };

        let prices = entries.remove("prices");

        // Requested ranges first, in request order
        let mut labels: Vec<String> = request
            .ranges
            .iter()
            .filter(|label| entries.contains_key(label.as_str()))
            .cloned()
            .collect();
        let extra: Vec<String> = entries
            .keys()
            .filter(|k| !labels.contains(k))
            .cloned()
            .collect();
        labels.extend(extra);

        let mut ranges = Vec::with_capacity(labels.len());
        for label in labels {
            let Some(data) = entries.remove(&label) else {
                continue;
            };
            let model = Model::from_json(data)?;
            if model.n_assets() != n_assets {
                return Err(PortfolioError::MalformedResponse(format!(
                    "model {} has {} assets, portfolio has {}",
                    label,
                    model.n_assets(),
                    n_assets
                )));
            }
            ranges.push((label, model));
        }
        let models = ModelSet::new(ranges, request.model_weights.as_ref())?;

        if request.include_prices {
            let prices = prices.ok_or_else(|| {
                PortfolioError::MalformedResponse("model response has no prices".to_string())
            })?;
            let quotes: HashMap<String, Quote> = serde_json::from_value(prices)?;
            let total = self.holdings_mut()?.update_prices(&quotes)?;
            tracing::info!(value = total, "retrieved prices with models");
        }

        self.models = models;
        self.invalidate_frontier();
        tracing::info!(ranges = self.models.len(), "retrieved models");
        Ok(())
    }

    /// Retrieve the efficient frontier for the current state
    ///
    /// A failed retrieval, including an infeasible problem, drops any
    /// previous frontier.
    ///
    /// # Errors
    /// * `PortfolioError::MissingPrices` or `PortfolioError::MissingModels`
    ///   before any call
    /// * `PortfolioError::Infeasible` if the solver finds no optimal point
    pub async fn retrieve_frontier(&mut self, params: &FrontierParams) -> Result<()> {
        self.prices()?;
        let model = self.model()?;
        let query = build_query(&model, self.holdings_ref()?, params)?;
        let payload = serde_json::to_value(&query)?;
        tracing::info!(
            method = %self.model_method,
            cashflow = params.cashflow,
            max_sales = params.max_sales,
            "retrieving frontier"
        );

        let result = match self.portfolio_client.call(EntryPoint::Frontier, payload).await {
            Ok(response) => serde_json::from_value::<FrontierResponse>(response)
                .map_err(PortfolioError::from)
                .and_then(|response| Frontier::from_response(response, &model, query)),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(frontier) => {
                tracing::info!(points = frontier.len(), "retrieved frontier");
                self.frontier = Some(frontier);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "frontier retrieval failed");
                self.invalidate_frontier();
                Err(e)
            }
        }
    }

    /// Recommended allocation for a target return
    ///
    /// Without `mu`, the target is the return the frontier attains at the
    /// risk of the current allocation. The exact method solves for the
    /// target and falls back to interpolation if the solver does not
    /// report an optimal solution.
    ///
    /// # Errors
    /// * `PortfolioError::MissingFrontier` without a frontier
    pub async fn retrieve_recommendation(
        &self,
        mu: Option<f64>,
        method: RecommendationMethod,
    ) -> Result<Recommendation> {
        let frontier = self.frontier.as_ref().ok_or(PortfolioError::MissingFrontier)?;
        let mu = match mu {
            Some(mu) => mu,
            None => {
                let (_, std) = self.return_and_variance()?;
                frontier.mu_at_std(std)?
            }
        };

        match method {
            RecommendationMethod::Approximate => frontier.recommend(mu),
            RecommendationMethod::Exact => {
                let payload = serde_json::to_value(frontier.query().with_target(mu))?;
                tracing::info!(mu, "retrieving exact recommendation");
                let response = self.portfolio_client.call(EntryPoint::Portfolio, payload).await?;
                let solution: Solution = serde_json::from_value(response)?;

                if solution.status.is_optimal() {
                    let x = Array1::from(solution.x);
                    let (_, std) = self.model()?.return_and_variance(&x)?;
                    Ok(Recommendation {
                        x,
                        status: solution.status,
                        std,
                        mu,
                    })
                } else {
                    tracing::warn!(
                        status = %solution.status,
                        "exact recommendation failed, using approximate"
                    );
                    frontier.recommend(mu)
                }
            }
        }
    }

    // Reporting

    /// Holdings table with prices, risk statistics and bounds
    pub fn portfolio_dataframe(&self) -> Result<DataFrame> {
        let holdings = self.holdings_ref()?;
        let model = if self.has_models() {
            Some(self.model()?)
        } else {
            None
        };
        report::holdings_frame(holdings, model.as_ref())
    }
}

impl fmt::Debug for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portfolio")
            .field("model_method", &self.model_method)
            .field("models", &self.models.labels().collect::<Vec<_>>())
            .field("holdings", &self.holdings.as_ref().map(Holdings::len))
            .field("frontier", &self.frontier_method())
            .finish_non_exhaustive()
    }
}

fn min_max<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{ConstraintFunction, ConstraintSign, ConstraintUnit};
    use crate::frontier::SolveStatus;
    use approx::assert_abs_diff_eq;
    use optimum_client::{ClientError, ScriptedClient};
    use optimum_model::ModelError;
    use serde_json::json;

    fn model_json(r: [f64; 2]) -> Value {
        json!({"r": r, "F": [[0.0], [0.0]], "Q": [0.04, 0.09], "D": [[1.0]]})
    }

    fn frontier_json() -> Value {
        json!({"frontier": [
            {"mu": 0.10, "sol": {"status": "optimal", "x": [1.0, 0.0]}},
            {"mu": 0.15, "sol": {"status": "optimal", "x": [0.5, 0.5]}},
            {"mu": 0.20, "sol": {"status": "optimal", "x": [0.0, 1.0]}},
        ]})
    }

    struct Fixture {
        portfolio: Portfolio,
        optimizer: Arc<ScriptedClient>,
        service: Arc<ScriptedClient>,
    }

    fn fixture() -> Fixture {
        let optimizer = Arc::new(ScriptedClient::new());
        let service = Arc::new(ScriptedClient::new());
        let mut portfolio = Portfolio::new(optimizer.clone(), service.clone());
        portfolio.import_holdings(Holdings::new([("A", 10.0), ("B", 10.0)]).unwrap());
        Fixture {
            portfolio,
            optimizer,
            service,
        }
    }

    async fn ready() -> Fixture {
        let mut fx = fixture();
        fx.service.respond(
            EntryPoint::Model,
            json!({
                "1mo": model_json([0.1, 0.2]),
                "prices": {"A": [0, 10.0], "B": [0, 10.0]},
            }),
        );
        let request = ModelRequest {
            ranges: vec!["1mo".to_string()],
            include_prices: true,
            ..ModelRequest::default()
        };
        fx.portfolio.retrieve_models(&request).await.unwrap();
        fx.optimizer.respond(EntryPoint::Frontier, frontier_json());
        fx.portfolio
            .retrieve_frontier(&FrontierParams::default())
            .await
            .unwrap();
        fx
    }

    #[tokio::test]
    async fn test_preconditions_before_calls() {
        let mut fx = fixture();
        let err = fx
            .portfolio
            .retrieve_frontier(&FrontierParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::MissingPrices));
        assert!(err.is_precondition());

        let err = fx
            .portfolio
            .retrieve_recommendation(Some(0.1), RecommendationMethod::Exact)
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::MissingFrontier));
        assert!(matches!(fx.portfolio.model(), Err(PortfolioError::MissingModels)));
        assert!(fx.optimizer.calls().is_empty());
        assert!(fx.service.calls().is_empty());

        let mut empty = Portfolio::new(fx.optimizer.clone(), fx.service.clone());
        assert!(matches!(
            empty.retrieve_prices().await,
            Err(PortfolioError::NoHoldings)
        ));
    }

    #[tokio::test]
    async fn test_models_with_prices() {
        let fx = ready().await;
        assert!(fx.portfolio.has_prices());
        assert!(fx.portfolio.has_models());
        assert_abs_diff_eq!(fx.portfolio.value(), 200.0, epsilon = 1e-12);
        assert_eq!(fx.portfolio.model_weights()["1mo"], 1.0);

        let payloads = fx.service.payloads(EntryPoint::Model);
        let payload = &payloads[0];
        assert_eq!(payload["tickers"], json!(["A", "B"]));
        assert_eq!(payload["options"]["include_prices"], json!(true));
    }

    #[tokio::test]
    async fn test_models_require_prices_when_requested() {
        let mut fx = fixture();
        fx.service
            .respond(EntryPoint::Model, json!({"1mo": model_json([0.1, 0.2])}));
        let request = ModelRequest {
            include_prices: true,
            ..ModelRequest::default()
        };
        let err = fx.portfolio.retrieve_models(&request).await.unwrap_err();
        assert!(matches!(err, PortfolioError::MalformedResponse(_)));
        assert!(!fx.portfolio.has_models());
    }

    #[tokio::test]
    async fn test_models_dimension_checked() {
        let mut fx = fixture();
        fx.service.respond(
            EntryPoint::Model,
            json!({"1mo": {"r": [0.1], "F": [[0.0]], "Q": [0.04], "D": [[1.0]]}}),
        );
        let err = fx
            .portfolio
            .retrieve_models(&ModelRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_frontier_provenance() {
        let mut fx = ready().await;
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::Optimal);
        assert!(fx.portfolio.frontier_query_params().is_some());

        let weights = HashMap::from([("1mo".to_string(), 2.0)]);
        fx.portfolio.set_models_weights(&weights).unwrap();
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::Approximate);
        assert!(fx.portfolio.has_frontier());

        fx.optimizer.respond(EntryPoint::Frontier, frontier_json());
        fx.portfolio
            .retrieve_frontier(&FrontierParams::default())
            .await
            .unwrap();
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::Optimal);

        fx.optimizer.fail(
            EntryPoint::Frontier,
            ClientError::Api("Invalid query".to_string()),
        );
        let err = fx
            .portfolio
            .retrieve_frontier(&FrontierParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::Client(ClientError::Api(ref d)) if d == "Invalid query"));
        assert!(!err.is_precondition());
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::None);
        assert!(fx.portfolio.frontier_query_params().is_none());
    }

    #[tokio::test]
    async fn test_bad_weights_keep_state() {
        let mut fx = ready().await;
        let err = fx
            .portfolio
            .set_models_weights(&HashMap::from([("6mo".to_string(), 1.0)]))
            .unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::Optimal);
    }

    #[tokio::test]
    async fn test_failed_method_change_keeps_state() {
        let mut fx = fixture();
        fx.service.respond(
            EntryPoint::Model,
            json!({
                "1mo": model_json([0.1, 0.2]),
                "6mo": {"r": [0.1, 0.2], "F": [[0.0], [0.0]], "Q": [0.04, 0.09], "D": [[0.0]]},
                "prices": {"A": [0, 10.0], "B": [0, 10.0]},
            }),
        );
        let request = ModelRequest {
            ranges: vec!["1mo".to_string(), "6mo".to_string()],
            include_prices: true,
            ..ModelRequest::default()
        };
        fx.portfolio.retrieve_models(&request).await.unwrap();
        fx.optimizer.respond(EntryPoint::Frontier, frontier_json());
        fx.portfolio
            .retrieve_frontier(&FrontierParams::default())
            .await
            .unwrap();
        let points = fx.portfolio.frontier().unwrap().points().to_vec();

        // The 6mo factor covariance has no inverse
        let err = fx
            .portfolio
            .set_model_method(ModelMethod::LinearFractional)
            .unwrap_err();
        assert!(matches!(err, PortfolioError::Model(ModelError::Singular)));
        assert_eq!(fx.portfolio.model_method(), ModelMethod::Linear);
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::Optimal);
        assert_eq!(fx.portfolio.frontier().unwrap().points(), points.as_slice());
    }

    #[tokio::test]
    async fn test_rejected_models_keep_prices() {
        let mut fx = ready().await;
        fx.service.respond(
            EntryPoint::Model,
            json!({
                "1mo": model_json([0.3, 0.4]),
                "prices": {"A": [0, 20.0], "B": [0, 20.0]},
            }),
        );
        let request = ModelRequest {
            ranges: vec!["1mo".to_string()],
            include_prices: true,
            model_weights: Some(HashMap::from([("6mo".to_string(), 1.0)])),
            ..ModelRequest::default()
        };
        let err = fx.portfolio.retrieve_models(&request).await.unwrap_err();

        assert!(matches!(
            err,
            PortfolioError::Model(ModelError::WeightKeyMismatch { .. })
        ));
        assert_abs_diff_eq!(fx.portfolio.value(), 200.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fx.portfolio.model().unwrap().r()[0], 0.1, epsilon = 1e-12);
        assert_eq!(fx.portfolio.frontier_method(), FrontierMethod::Optimal);
    }

    #[tokio::test]
    async fn test_recommendation_from_current_risk() {
        let fx = ready().await;
        // Current allocation is [0.5, 0.5] with std sqrt(0.0325)/1
        let (mu, std) = fx.portfolio.return_and_variance().unwrap();
        assert_abs_diff_eq!(mu, 0.15, epsilon = 1e-12);

        let rec = fx
            .portfolio
            .retrieve_recommendation(None, RecommendationMethod::Approximate)
            .await
            .unwrap();
        assert_abs_diff_eq!(rec.std, std, epsilon = 1e-9);
        assert_eq!(rec.status, SolveStatus::Optimal);
        assert!(fx.optimizer.payloads(EntryPoint::Portfolio).is_empty());
    }

    #[tokio::test]
    async fn test_exact_recommendation() {
        let fx = ready().await;
        fx.optimizer.respond(
            EntryPoint::Portfolio,
            json!({"status": "optimal", "x": [0.4, 0.6], "obj": 1.0}),
        );
        let rec = fx
            .portfolio
            .retrieve_recommendation(Some(0.16), RecommendationMethod::Exact)
            .await
            .unwrap();
        assert_eq!(rec.x.to_vec(), vec![0.4, 0.6]);
        assert_abs_diff_eq!(
            rec.std,
            (0.16_f64 * 0.04 + 0.36 * 0.09).sqrt(),
            epsilon = 1e-12
        );

        let payloads = fx.optimizer.payloads(EntryPoint::Portfolio);
        let payload = &payloads[0];
        assert_eq!(payload["mu"], json!(0.16));
        assert_eq!(payload["x0"], json!([0.5, 0.5]));
    }

    #[tokio::test]
    async fn test_exact_recommendation_falls_back_once() {
        let fx = ready().await;
        fx.optimizer
            .respond(EntryPoint::Portfolio, json!({"status": "infeasible"}));
        let rec = fx
            .portfolio
            .retrieve_recommendation(Some(0.125), RecommendationMethod::Exact)
            .await
            .unwrap();
        assert_abs_diff_eq!(rec.x[0], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(rec.x[1], 0.25, epsilon = 1e-12);
        assert_eq!(fx.optimizer.payloads(EntryPoint::Portfolio).len(), 1);
    }

    #[test]
    fn test_constraints_tighten_and_reset() {
        let mut fx = fixture();
        let holdings_le = |v: f64| {
            Constraint::new(
                ConstraintFunction::Holdings,
                ConstraintSign::LessOrEqual,
                v,
                ConstraintUnit::Shares,
            )
        };

        fx.portfolio
            .apply_constraint(&["A"], &holdings_le(8.0), TradingOptions::default())
            .unwrap();
        fx.portfolio
            .apply_constraint(&["A"], &holdings_le(12.0), TradingOptions::default())
            .unwrap();
        assert_eq!(fx.portfolio.holdings().unwrap().upper()[0], 8.0);

        fx.portfolio.remove_constraints(&["A"]).unwrap();
        fx.portfolio
            .apply_constraint(&["A"], &holdings_le(12.0), TradingOptions::default())
            .unwrap();
        assert_eq!(fx.portfolio.holdings().unwrap().upper()[0], 12.0);

        let none: [&str; 0] = [];
        fx.portfolio
            .apply_constraint(&none, &holdings_le(1.0), TradingOptions::default())
            .unwrap();
        assert_eq!(fx.portfolio.holdings().unwrap().upper()[0], 12.0);

        assert!(matches!(
            fx.portfolio
                .apply_constraint(&["Z"], &holdings_le(1.0), TradingOptions::default()),
            Err(PortfolioError::UnknownTicker(_))
        ));
    }

    #[tokio::test]
    async fn test_range_and_import_invalidates() {
        let mut fx = ready().await;
        let ((mu_lo, mu_hi), (std_lo, std_hi)) = fx.portfolio.range().unwrap();
        assert_abs_diff_eq!(mu_lo, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(mu_hi, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(std_lo, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(std_hi, 0.3, epsilon = 1e-12);

        fx.portfolio
            .import_holdings(Holdings::new([("C", 1.0)]).unwrap());
        assert!(!fx.portfolio.has_models());
        assert!(!fx.portfolio.has_frontier());
        assert!(!fx.portfolio.has_prices());
    }
}
