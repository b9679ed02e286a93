//! Error types for metrics-aggregator

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Malformed metric line '{line}': {reason}")]
    MalformedLine { line: String, reason: String },

    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Scrape error: {0}")]
    Scrape(String),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedLine {
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn inventory(msg: impl Into<String>) -> Self {
        Error::Inventory(msg.into())
    }

    pub fn scrape(msg: impl Into<String>) -> Self {
        Error::Scrape(msg.into())
    }
}
