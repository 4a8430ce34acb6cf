use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Path, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::domain::device::{DeviceInput, DeviceUpdate, DeviceView};
use crate::domain::registry::{ActionReport, RegistryController, RemoteAction};
use crate::error::RegistryError;

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryController>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub devices: usize,
}

/// Body of every non-2xx response produced by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            RegistryError::Validation(_) | RegistryError::Selection => StatusCode::BAD_REQUEST,
            RegistryError::Index { .. } => StatusCode::NOT_FOUND,
            RegistryError::Action(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Io { .. } | RegistryError::Parse { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `Path` whose rejection is an [`ErrorBody`] like every other failure.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(RegistryError::Validation(rejection.body_text()).into()),
        }
    }
}

/// `Json` whose rejection is an [`ErrorBody`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(RegistryError::Validation(rejection.body_text()).into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/devices", get(list_devices).post(add_device))
        .route(
            "/api/v1/devices/{index}",
            put(edit_device).delete(remove_device),
        )
        .route("/api/v1/devices/{index}/{action}", post(run_action))
        .route("/api/v1/events", get(events))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        devices: state.registry.store().len().await,
    })
}

async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceView>> {
    let devices = state.registry.list_devices().await;
    Json(devices.into_iter().map(DeviceView::from).collect())
}

async fn add_device(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<DeviceInput>,
) -> ApiResult<(StatusCode, Json<DeviceView>)> {
    let index = state.registry.add_device(input).await?;
    let snapshot = state.registry.device(index).await?;
    Ok((StatusCode::CREATED, Json(snapshot.into())))
}

async fn edit_device(
    State(state): State<AppState>,
    ApiPath(index): ApiPath<usize>,
    ApiJson(update): ApiJson<DeviceUpdate>,
) -> ApiResult<Json<DeviceView>> {
    state.registry.edit_device(Some(index), update).await?;
    let snapshot = state.registry.device(index).await?;
    Ok(Json(snapshot.into()))
}

async fn remove_device(
    State(state): State<AppState>,
    ApiPath(index): ApiPath<usize>,
) -> ApiResult<StatusCode> {
    state.registry.remove_device(Some(index)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_action(
    State(state): State<AppState>,
    ApiPath((index, action)): ApiPath<(usize, RemoteAction)>,
) -> ApiResult<Json<ActionReport>> {
    let registry = &state.registry;
    let report = match action {
        RemoteAction::Reboot => registry.reboot(Some(index)).await?,
        RemoteAction::Shutdown => registry.shutdown(Some(index)).await?,
        RemoteAction::Wake => registry.wake(Some(index)).await?,
    };
    Ok(Json(report))
}

/// Push a `registry` event whenever the device list or statuses change.
/// Slow subscribers that lag behind simply skip the missed notifications.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = BroadcastStream::new(state.registry.subscribe())
        .filter_map(|msg| msg.ok())
        .map(|event| Event::default().event("registry").json_data(event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
