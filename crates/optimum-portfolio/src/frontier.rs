//! Efficient frontier and interpolated recommendations.

use crate::error::{PortfolioError, Result};
use crate::query::PortfolioQuery;
use ndarray::Array1;
use optimum_model::Model;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Solver status of a solution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SolveStatus {
    /// Optimal solution found
    Optimal,
    /// No feasible solution
    Infeasible,
    /// Any other status reported by the solver
    Other(String),
}

impl SolveStatus {
    /// Is the solution optimal
    pub const fn is_optimal(&self) -> bool {
        matches!(self, Self::Optimal)
    }
}

impl From<String> for SolveStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "optimal" => Self::Optimal,
            "infeasible" => Self::Infeasible,
            _ => Self::Other(status),
        }
    }
}

impl From<SolveStatus> for String {
    fn from(status: SolveStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Optimal => f.write_str("optimal"),
            Self::Infeasible => f.write_str("infeasible"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Solver solution for one target return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// Solver status
    pub status: SolveStatus,
    /// Allocation, empty unless optimal
    #[serde(default)]
    pub x: Vec<f64>,
    /// Objective value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj: Option<f64>,
}

/// Raw frontier point as returned by the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionPoint {
    /// Target return
    pub mu: f64,
    /// Solution at the target
    pub sol: Solution,
}

/// Response of the `frontier` entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierResponse {
    /// Points in solver order
    #[serde(default)]
    pub frontier: Vec<SolutionPoint>,
}

/// How the current frontier was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontierMethod {
    /// No frontier
    #[default]
    None,
    /// Solved against the current model
    Optimal,
    /// Rescored from stored allocations after a model change
    Approximate,
}

impl fmt::Display for FrontierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Optimal => "optimal",
            Self::Approximate => "approximate",
        })
    }
}

/// Frontier column used for lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontierColumn {
    /// Expected return
    Mu,
    /// Standard deviation
    Std,
}

impl FrontierColumn {
    const fn value(&self, point: &FrontierPoint) -> f64 {
        match self {
            Self::Mu => point.mu,
            Self::Std => point.std,
        }
    }
}

/// One frontier point
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierPoint {
    /// Expected return
    pub mu: f64,
    /// Standard deviation
    pub std: f64,
    /// Allocation as fractions of portfolio value
    pub x: Array1<f64>,
}

/// Position of a value relative to the frontier points
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Location<'a> {
    /// At or before the first point
    Before(&'a FrontierPoint),
    /// At or after the last point
    After(&'a FrontierPoint),
    /// Strictly inside the bracket `(left, right]`
    Between(&'a FrontierPoint, &'a FrontierPoint),
}

impl<'a> Location<'a> {
    /// Bracketing point to the left, if any
    pub const fn left(&self) -> Option<&'a FrontierPoint> {
        match *self {
            Self::Before(_) => None,
            Self::After(p) | Self::Between(p, _) => Some(p),
        }
    }

    /// Bracketing point to the right, if any
    pub const fn right(&self) -> Option<&'a FrontierPoint> {
        match *self {
            Self::After(_) => None,
            Self::Before(p) | Self::Between(_, p) => Some(p),
        }
    }
}

/// Recommendation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationMethod {
    /// Interpolate the frontier
    #[default]
    Approximate,
    /// Solve for the target return, falling back to interpolation
    Exact,
}

impl FromStr for RecommendationMethod {
    type Err = PortfolioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "approximate" => Ok(Self::Approximate),
            "exact" => Ok(Self::Exact),
            _ => Err(PortfolioError::Parse(format!(
                "unknown recommendation method: {}",
                s
            ))),
        }
    }
}

/// Recommended allocation
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    /// Allocation as fractions of portfolio value
    pub x: Array1<f64>,
    /// Solver status, `optimal` for interpolated allocations
    pub status: SolveStatus,
    /// Standard deviation
    pub std: f64,
    /// Expected return
    pub mu: f64,
}

/// Frontier points with the query that produced them
///
/// Points are kept in ascending `mu`, also after rescoring.
#[derive(Debug, Clone)]
pub struct Frontier {
    points: Vec<FrontierPoint>,
    query: PortfolioQuery,
    method: FrontierMethod,
}

impl Frontier {
    /// Assemble a frontier from a solver response
    ///
    /// Non-optimal points are dropped; the risk of each point is
    /// recomputed with `model`.
    ///
    /// # Errors
    /// * `PortfolioError::Infeasible` if no optimal point remains
    pub fn from_response(response: FrontierResponse, model: &Model, query: PortfolioQuery) -> Result<Self> {
        let total = response.frontier.len();
        let mut points = response
            .frontier
            .into_iter()
            .filter(|p| p.sol.status.is_optimal())
            .map(|p| -> Result<FrontierPoint> {
                let x = Array1::from(p.sol.x);
                let (_, std) = model.return_and_variance(&x)?;
                Ok(FrontierPoint { mu: p.mu, std, x })
            })
            .collect::<Result<Vec<_>>>()?;

        if points.is_empty() {
            return Err(PortfolioError::Infeasible);
        }
        if points.len() < total {
            tracing::debug!(dropped = total - points.len(), "dropped non-optimal frontier points");
        }
        sort_by_mu(&mut points);

        Ok(Self {
            points,
            query,
            method: FrontierMethod::Optimal,
        })
    }

    /// Points in order
    pub fn points(&self) -> &[FrontierPoint] {
        &self.points
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Is the frontier empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Query that produced the frontier
    pub const fn query(&self) -> &PortfolioQuery {
        &self.query
    }

    /// Provenance of the points
    pub const fn method(&self) -> FrontierMethod {
        self.method
    }

    /// Recompute `mu` and `std` of every point from its allocation
    ///
    /// The new returns need not follow the old order, so points are
    /// re-sorted by `mu`. Marks the frontier as approximate.
    pub fn rescore(&mut self, model: &Model) -> Result<()> {
        for point in &mut self.points {
            let (mu, std) = model.return_and_variance(&point.x)?;
            point.mu = mu;
            point.std = std;
        }
        sort_by_mu(&mut self.points);
        self.method = FrontierMethod::Approximate;
        Ok(())
    }

    /// Range of `mu` and `std` from the first to the last point
    ///
    /// # Returns
    /// * ((mu first, mu last), (std first, std last))
    pub fn range(&self) -> ((f64, f64), (f64, f64)) {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => ((first.mu, last.mu), (first.std, last.std)),
            _ => ((f64::NAN, f64::NAN), (f64::NAN, f64::NAN)),
        }
    }

    /// Points searched for a column
    ///
    /// `std` decreases up to the minimum-variance point and increases after
    /// it, so `std` lookups only see the efficient part.
    fn search_points(&self, column: FrontierColumn) -> &[FrontierPoint] {
        match column {
            FrontierColumn::Mu => &self.points,
            FrontierColumn::Std => {
                let start = self
                    .points
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| a.std.total_cmp(&b.std))
                    .map_or(0, |(i, _)| i);
                &self.points[start..]
            }
        }
    }

    /// Locate `value` on a frontier column by binary search
    ///
    /// # Returns
    /// * `Location::Before(first)` at or before the first point
    /// * `Location::After(last)` at or after the last point
    /// * `Location::Between(left, right)` with `left < value <= right`
    ///   otherwise
    ///
    /// # Errors
    /// * `PortfolioError::MissingFrontier` on an empty frontier
    pub fn locate(&self, value: f64, column: FrontierColumn) -> Result<Location<'_>> {
        let points = self.search_points(column);
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return Err(PortfolioError::MissingFrontier);
        };

        let index = points.partition_point(|p| column.value(p) < value);
        Ok(if index == 0 {
            Location::Before(first)
        } else if index == points.len() || value >= column.value(last) {
            Location::After(last)
        } else {
            Location::Between(&points[index - 1], &points[index])
        })
    }

    /// Expected return at a given risk, interpolated on the efficient part
    /// of the frontier
    pub fn mu_at_std(&self, std: f64) -> Result<f64> {
        Ok(match self.locate(std, FrontierColumn::Std)? {
            Location::Before(p) | Location::After(p) => p.mu,
            Location::Between(left, right) => {
                let eta = (std - left.std) / (right.std - left.std);
                (1.0 - eta) * left.mu + eta * right.mu
            }
        })
    }

    /// Allocation at a target return, interpolated between bracketing points
    ///
    /// Outside the frontier the nearest end point is returned.
    pub fn recommend(&self, mu: f64) -> Result<Recommendation> {
        let (x, std) = match self.locate(mu, FrontierColumn::Mu)? {
            Location::Before(p) | Location::After(p) => (p.x.clone(), p.std),
            Location::Between(left, right) => {
                let eta = (mu - left.mu) / (right.mu - left.mu);
                (
                    &left.x * (1.0 - eta) + &right.x * eta,
                    (1.0 - eta) * left.std + eta * right.std,
                )
            }
        };
        Ok(Recommendation {
            x,
            status: SolveStatus::Optimal,
            std,
            mu,
        })
    }
}

fn sort_by_mu(points: &mut [FrontierPoint]) {
    points.sort_by(|a, b| a.mu.total_cmp(&b.mu));
}
