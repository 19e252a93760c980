#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/vicbee/optimum/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export main types from sub-crates
pub use optimum_client as client;
pub use optimum_model as model;
pub use optimum_portfolio as portfolio;

pub use optimum_client::{ApiClient, ClientConfig, EntryPoint, HttpClient};
pub use optimum_model::{Model, ModelMethod, ModelSet};
pub use optimum_portfolio::{
    Constraint, ConstraintFunction, ConstraintSign, ConstraintUnit, FrontierMethod,
    FrontierParams, ModelRequest, Portfolio, PortfolioError, Recommendation,
    RecommendationMethod, TradingOptions,
};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
