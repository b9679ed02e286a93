//! API handlers

use axum::{
    extract::{RawQuery, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::AppState;
use crate::Error;

/// Content type of the aggregated document
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Health check with discovery status
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.snapshot();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        snapshot_generated_at: snapshot.generated_at(),
        jobs: snapshot.job_count(),
        endpoints: snapshot.endpoint_count(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub snapshot_generated_at: DateTime<Utc>,
    pub jobs: usize,
    pub endpoints: usize,
}

/// Aggregate the metrics of the job named by `?job=<name>`
pub async fn aggregate(
    State(state): State<AppState>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Result<Response, (StatusCode, String)> {
    if method != Method::GET {
        return Err((
            StatusCode::METHOD_NOT_ALLOWED,
            format!("Method {} not supported", method),
        ));
    }

    let job = parse_job_query(query.as_deref()).map_err(error_response)?;

    let document = state
        .aggregator
        .aggregate(&job)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        document.render(),
    )
        .into_response())
}

/// Extract the job name from a raw query string of the form `job=<name>`.
///
/// The string is split once on `=`; everything after it is the job name.
pub fn parse_job_query(query: Option<&str>) -> crate::Result<String> {
    let (name, value) = query
        .and_then(|q| q.split_once('='))
        .ok_or_else(|| Error::InvalidQuery("Target job name not specified".to_string()))?;

    if name != "job" {
        return Err(Error::InvalidQuery(format!("Unknown parameter '{}'", name)));
    }

    Ok(value.to_string())
}

fn error_response(err: Error) -> (StatusCode, String) {
    match err {
        Error::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, msg),
        Error::JobNotFound(job) => {
            tracing::debug!(%job, "Query for unknown job");
            (
                StatusCode::BAD_REQUEST,
                "Target job name not found in cache".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Aggregation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_query() {
        assert_eq!(parse_job_query(Some("job=api")).unwrap(), "api");
        assert_eq!(parse_job_query(Some("job=a=b")).unwrap(), "a=b");
        assert_eq!(parse_job_query(Some("job=")).unwrap(), "");
    }

    #[test]
    fn test_parse_job_query_errors() {
        for query in [None, Some(""), Some("job")] {
            let err = parse_job_query(query).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidQuery(msg) if msg == "Target job name not specified"),
                "unexpected error for {:?}: {}",
                query,
                err
            );
        }

        let err = parse_job_query(Some("name=api")).unwrap_err();
        assert!(matches!(&err, Error::InvalidQuery(msg) if msg == "Unknown parameter 'name'"));
    }
}
