//! HTTP handlers for the publish webhook and server status

use axum::{
    Form, Json,
    extract::rejection::FormRejection,
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::error::RelayError;
use crate::request::BuildRequest;

/// Builds and publishes the commit described by the request parameters.
///
/// Parameters come from the query string and from a form-encoded body; body
/// values win. Responds 200 with an empty body once the preview is published,
/// whether or not the pull request comment went through.
pub async fn publish(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Result<StatusCode, RelayError> {
    let mut params = query;
    match form {
        Ok(Form(body)) => params.extend(body),
        Err(rejection) => debug!("No form body: {}", rejection),
    }

    let request = BuildRequest::from_params(&params).map_err(|e| {
        warn!("Rejected publish request: {}", e);
        e
    })?;

    match state.publisher.publish(&request).await {
        Ok(report) => {
            info!(
                "Run {} for {} done, comment: {:?}",
                report.run_id, report.preview_url, report.notification
            );
            Ok(StatusCode::OK)
        }
        Err(e) => {
            error!("Publishing commit {} failed: {}", request.commit, e);
            Err(e)
        }
    }
}

/// Liveness report with uptime and the preview domain.
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "host_domain": state.publisher.config().host_domain,
        "status": "healthy"
    }))
}
