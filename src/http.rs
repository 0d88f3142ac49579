use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::engine::{Engine, FindError};
use crate::limits::MAX_QUERY_HOURS;
use crate::model::{AvailabilityWindow, Room};

/// Seconds a client should wait before retrying while credentials are absent.
const CREDENTIAL_RETRY_AFTER_SECS: u32 = 30;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub window_padding_hours: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/find-rooms", get(find_rooms))
        .route("/health", get(health))
        .with_state(state)
}

/// `FindError` rendered as an HTTP response.
pub struct ApiError(pub FindError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            FindError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            FindError::CredentialAbsent => StatusCode::SERVICE_UNAVAILABLE,
            FindError::UpstreamUnavailable(_)
            | FindError::UpstreamStatus(_)
            | FindError::Parse(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<FindError> for ApiError {
    fn from(e: FindError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(json!({ "error": self.0.to_string() }))).into_response();
        if matches!(self.0, FindError::CredentialAbsent) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(CREDENTIAL_RETRY_AFTER_SECS),
            );
        }
        response
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FindRoomsParams {
    pub hours_from_now: Option<String>,
    pub duration_hours: Option<String>,
    pub prettified: Option<String>,
}

fn hours(raw: &str, name: &str) -> Result<u32, FindError> {
    match raw.trim().parse::<u32>() {
        Ok(h) if h <= MAX_QUERY_HOURS => Ok(h),
        Ok(_) => Err(FindError::InvalidQuery(format!(
            "{name} must be at most {MAX_QUERY_HOURS}"
        ))),
        Err(_) => Err(FindError::InvalidQuery(format!(
            "{name} must be a non-negative integer"
        ))),
    }
}

/// Validate the query and turn it into `(hours_from_now, duration_hours)`.
pub fn parse_offsets(params: &FindRoomsParams) -> Result<(u32, u32), FindError> {
    let (Some(from_now), Some(duration)) = (
        params.hours_from_now.as_deref().filter(|s| !s.trim().is_empty()),
        params.duration_hours.as_deref().filter(|s| !s.trim().is_empty()),
    ) else {
        return Err(FindError::InvalidQuery(
            "hours_from_now and duration_hours are required parameters".into(),
        ));
    };
    Ok((hours(from_now, "hours_from_now")?, hours(duration, "duration_hours")?))
}

/// One `[room_id] name (building_code)` line per room.
pub fn prettify(rooms: &[Room]) -> String {
    rooms
        .iter()
        .map(|r| format!("[{}] {} ({})", r.room_id, r.name, r.building_code))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn find_rooms(
    State(state): State<AppState>,
    Query(params): Query<FindRoomsParams>,
) -> Result<Response, ApiError> {
    let result = find_rooms_inner(&state, &params).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => e.status_code(),
    };
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "route" => "find_rooms",
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    result
}

async fn find_rooms_inner(state: &AppState, params: &FindRoomsParams) -> Result<Response, ApiError> {
    let (from_now, duration) = parse_offsets(params)?;
    let now = chrono::Local::now().naive_local();
    let window =
        AvailabilityWindow::from_offsets(now, from_now, duration, state.window_padding_hours);

    let rooms = state.engine.find_rooms(&window).await?;

    let prettified = params
        .prettified
        .as_deref()
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if prettified {
        return Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            prettify(&rooms),
        )
            .into_response());
    }
    Ok(Json(json!({ "rooms": rooms })).into_response())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "credentials": state.engine.credentials().is_initialized(),
        "cached_rooms": state.engine.rooms().len()
    }))
}
