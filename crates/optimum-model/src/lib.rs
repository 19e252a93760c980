#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod linalg;
pub mod model;
pub mod set;

pub use error::{ModelError, Result};
pub use model::{Covariance, CovarianceSource, FieldValue, Model, ModelData, ModelField};
pub use set::{ModelMethod, ModelSet};
