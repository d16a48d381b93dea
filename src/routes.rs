use std::{sync::Arc, time::Instant};

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, MatchedPath, Path, Query, State,
    },
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use journal_core::{
    CreateEntryCommand, EntryQuery, EntryView, FieldError, SortOrder, StorageError,
    UpdateEntryCommand, Validate, ValidationError, DEFAULT_LIMIT,
};

use crate::{service::EntryService, telemetry::ERROR_REPORT_TARGET};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EntryService>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn build_router(service: Arc<EntryService>, metrics: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/entries", get(list_entries).post(create_entry))
        .route("/entries/", get(list_entries).post(create_entry))
        .route(
            "/entries/:id",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .route("/healthz", get(healthz));
    if metrics.is_some() {
        router = router.route("/metrics", get(render_metrics));
    }
    router
        .route_layer(middleware::from_fn(track_requests))
        .with_state(AppState { service, metrics })
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Vec<FieldError>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn entry_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Entry not found")
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "Validation failed".to_string(),
            details: err.0,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // bad syntax, wrong content type and schema mismatches alike
        Self::unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(target: ERROR_REPORT_TARGET, error = %err, "Storage failure");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldError>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

/// JSON body that has passed schema validation.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for ValidatedJson<T>
where
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    T: Validate,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Optional listing parameters. With none of them present the full, unpaginated
/// list is returned.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub q: Option<String>,
    pub sort: Option<String>,
}

impl ListParams {
    fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none() && self.q.is_none() && self.sort.is_none()
    }

    fn into_query(self) -> EntryQuery {
        EntryQuery {
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            offset: self.offset.unwrap_or(0),
            q: self.q,
            sort: self.sort.as_deref().map(SortOrder::parse).unwrap_or_default(),
        }
    }
}

async fn create_entry(
    State(state): State<AppState>,
    ValidatedJson(command): ValidatedJson<CreateEntryCommand>,
) -> Result<(StatusCode, Json<EntryView>), ApiError> {
    let entry = state.service.create(command).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_entries(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<EntryView>>, ApiError> {
    let Query(params) = params?;
    let entries = if params.is_empty() {
        state.service.list_all().await?
    } else {
        state.service.query(params.into_query()).await?
    };
    Ok(Json(entries))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EntryView>, ApiError> {
    state
        .service
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(ApiError::entry_not_found)
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidatedJson(changes): ValidatedJson<UpdateEntryCommand>,
) -> Result<Json<EntryView>, ApiError> {
    state
        .service
        .update(&id, changes)
        .await?
        .map(Json)
        .ok_or_else(ApiError::entry_not_found)
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.service.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::entry_not_found())
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Request counter and latency histogram keyed by route template, plus a debug log line.
async fn track_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => req.uri().path().to_string(),
    };

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    metrics::increment_counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.to_string()
    );
    metrics::histogram!(
        "http_request_duration_seconds",
        latency,
        "method" => method.clone(),
        "path" => path.clone()
    );
    tracing::debug!(%method, %path, status, latency_ms = latency * 1000.0, "Request handled");
    response
}
