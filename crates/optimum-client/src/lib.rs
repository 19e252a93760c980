#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

pub use client::{ApiClient, EntryPoint, HttpClient};
pub use config::{ClientConfig, DEFAULT_BASE_URL, MODELS_API, OPTIMIZE_API};
pub use error::{ClientError, Result};
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedClient;
