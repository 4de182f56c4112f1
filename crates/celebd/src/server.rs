//! HTTP surface: classification, athlete descriptions, health.

use crate::engine::{EngineError, EngineHandle};
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, FormRejection};
use axum::extract::{DefaultBodyLimit, State};
use axum::Extension;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use celeb_core::{ClassRegistry, ClassificationResult, ImageSource, PipelineError};
use celeb_summary::{get_celebrity_summary, pretty_name_from_label, SummaryGenerator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

/// Process-wide context shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub registry: Arc<ClassRegistry>,
    pub summarizer: Option<Arc<dyn SummaryGenerator>>,
}

/// Body limit handed to the rejection mapping.
#[derive(Clone, Copy)]
struct BodyLimit(usize);

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/classify_image", post(classify_image))
        .route("/describe", post(describe).options(describe_preflight))
        .route("/health", get(health))
        .layer(Extension(BodyLimit(max_body_bytes)))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(SetResponseHeaderLayer::if_not_present(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .with_state(state)
}

/// JSON `{"error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn payload_too_large(limit: usize) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: format!("Request body exceeds {limit} bytes"),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Pipeline(PipelineError::Decode(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Deserialize)]
struct ClassifyForm {
    image_data: Option<String>,
}

async fn classify_image(
    State(state): State<AppState>,
    Extension(BodyLimit(limit)): Extension<BodyLimit>,
    form: Result<Form<ClassifyForm>, FormRejection>,
) -> Result<Json<Vec<ClassificationResult>>, ApiError> {
    let image_data = match form {
        Ok(Form(ClassifyForm {
            image_data: Some(data),
        })) => data,
        Ok(_) => return Err(ApiError::bad_request("Missing 'image_data'")),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(limit, "classify body too large");
            return Err(ApiError::payload_too_large(limit));
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable classify form");
            return Err(ApiError::bad_request("Missing 'image_data'"));
        }
    };

    tracing::info!(bytes = image_data.len(), "POST /classify_image");
    let results = state.engine.classify(ImageSource::Base64(image_data)).await?;
    Ok(Json(results))
}

#[derive(Serialize)]
struct DescribeResponse {
    label: String,
    name: String,
    summary: String,
}

/// Body is read leniently: anything that is not a JSON object with a
/// non-empty string `label` is a missing label.
async fn describe(
    State(state): State<AppState>,
    Extension(BodyLimit(limit)): Extension<BodyLimit>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<DescribeResponse>, ApiError> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return Err(ApiError::payload_too_large(limit));
        }
        Err(_) => Bytes::new(),
    };
    let label = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("label").and_then(|l| l.as_str()).map(str::to_owned))
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing 'label'"))?;

    tracing::info!(label = %label, "POST /describe");
    let summary = get_celebrity_summary(state.summarizer.as_deref(), &label).await;
    let name = pretty_name_from_label(&label);

    Ok(Json(DescribeResponse { label, name, summary }))
}

async fn describe_preflight() -> impl IntoResponse {
    tracing::debug!("OPTIONS /describe");
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
            (ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
        ],
    )
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "classes": state.registry.names().collect::<Vec<_>>(),
    }))
}
