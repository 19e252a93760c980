#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod constraints;
pub mod error;
pub mod frontier;
pub mod holdings;
pub mod portfolio;
pub mod query;
pub mod report;

pub use constraints::{
    Bounds, Constraint, ConstraintFunction, ConstraintSign, ConstraintUnit, ConstraintValue,
    TradingOptions, constraint_bounds,
};
pub use error::{PortfolioError, Result};
pub use frontier::{
    Frontier, FrontierColumn, FrontierMethod, FrontierPoint, Location, Recommendation,
    RecommendationMethod, SolveStatus,
};
pub use holdings::{Holdings, Prices, Quote};
pub use portfolio::Portfolio;
pub use query::{FrontierParams, ModelRequest, PortfolioQuery, ReturnModel, build_query};
