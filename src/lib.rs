//! metrics-aggregator - per-job Prometheus metrics from labelled pods
//!
//! Pods opt in with `<prefix>/job-name` labels. The service keeps an index of
//! participating pods per job and, for `GET /?job=<name>`:
//! - scrapes every pod of the job concurrently
//! - tags each sample with the pod's identity and an `up` liveness sample
//! - merges everything into one sorted, deduplicated exposition document

pub mod aggregator;
pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exposition;
pub mod scrape;
pub mod types;

pub use error::{Error, Result};
