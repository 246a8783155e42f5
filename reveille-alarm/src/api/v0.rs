//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the daemon reaches 1.0.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::TimeDelta;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::alarm::{AlarmId, AlarmRecord, AlarmValue, Weekdays};
use crate::api_client::types::{
    AlarmPatchRequest, AlarmRequest, AlarmView, ErrorView, NextWakeView, SnoozeRequest,
};
use crate::clock::Clock;
use crate::config::AlarmDefaults;
use crate::error::Error;
use crate::scheduler::SchedulerStatus;

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(list_alarms, create_alarm))
        .routes(routes!(get_alarm, put_alarm, patch_alarm, delete_alarm))
        .routes(routes!(dismiss_alarm))
        .routes(routes!(snooze_alarm))
        .routes(routes!(next_wake))
}

/// Error response: status code plus a JSON `{"error": ...}` body.
#[derive(Debug)]
struct ApiError {
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
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidValue(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Rejected { .. } | Error::StaleEvent { .. } => StatusCode::CONFLICT,
        Error::SchedulingFault(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            status: status_for(&error),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorView {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_id(raw: &str) -> ApiResult<AlarmId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("malformed alarm id {raw:?}")))
}

fn alarm_value(request: AlarmRequest, defaults: &AlarmDefaults) -> ApiResult<AlarmValue> {
    Ok(AlarmValue {
        enabled: request.enabled,
        hour: request.hour,
        minute: request.minute,
        days: Weekdays::parse_names(&request.days)?,
        label: request.label,
        vibrate: request.vibrate,
        ringtone: request.ringtone,
        pre_alarm: request.pre_alarm,
        pre_alarm_minutes: request
            .pre_alarm_minutes
            .unwrap_or(defaults.pre_alarm_minutes),
        snooze_minutes: request.snooze_minutes.unwrap_or(defaults.snooze_minutes),
        auto_silence_minutes: request
            .auto_silence_minutes
            .unwrap_or(defaults.auto_silence_minutes),
        delete_after_dismiss: request.delete_after_dismiss,
    })
}

fn alarm_view(record: &AlarmRecord) -> AlarmView {
    let AlarmRecord { id, value, state } = record;
    AlarmView {
        id: id.to_string(),
        enabled: value.enabled,
        hour: value.hour,
        minute: value.minute,
        days: value.days.names(),
        label: value.label.clone(),
        vibrate: value.vibrate,
        ringtone: value.ringtone.clone(),
        pre_alarm: value.pre_alarm,
        pre_alarm_minutes: value.pre_alarm_minutes,
        snooze_minutes: value.snooze_minutes,
        auto_silence_minutes: value.auto_silence_minutes,
        delete_after_dismiss: value.delete_after_dismiss,
        state: state.name().to_string(),
        trigger: state.occurrence(),
        next_wake: state.next_trigger(),
    }
}

fn next_wake_view(status: SchedulerStatus, clock: &dyn Clock) -> NextWakeView {
    match status.next {
        Some(wake) => NextWakeView {
            alarm_id: Some(wake.id.to_string()),
            at: Some(wake.at),
            local_time: Some(clock.to_local(wake.at).format("%Y-%m-%d %H:%M").to_string()),
            kind: Some(wake.kind.to_string()),
            fault: status.fault,
        },
        None => NextWakeView {
            fault: status.fault,
            ..NextWakeView::default()
        },
    }
}

fn current_view(state: &SharedState, id: AlarmId) -> ApiResult<Json<AlarmView>> {
    Ok(Json(alarm_view(&state.manager.get(id)?)))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return all alarms in creation order.
#[utoipa::path(
    get,
    path = "/alarms",
    tag = "alarms",
    responses(
        (status = OK, description = "All alarms", body = Vec<AlarmView>),
    ),
)]
async fn list_alarms(State(state): State<SharedState>) -> Json<Vec<AlarmView>> {
    Json(state.manager.get_all().iter().map(alarm_view).collect())
}

/// Create an alarm.
#[utoipa::path(
    post,
    path = "/alarms",
    tag = "alarms",
    request_body = AlarmRequest,
    responses(
        (status = CREATED, description = "Alarm created", body = AlarmView),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid alarm definition", body = ErrorView),
        (status = INTERNAL_SERVER_ERROR, description = "Storage failure", body = ErrorView),
    ),
)]
async fn create_alarm(
    State(state): State<SharedState>,
    Json(request): Json<AlarmRequest>,
) -> ApiResult<(StatusCode, Json<AlarmView>)> {
    let value = alarm_value(request, &state.defaults)?;
    let id = state.manager.create(value).await?;
    Ok((StatusCode::CREATED, current_view(&state, id)?))
}

/// Return a single alarm.
#[utoipa::path(
    get,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = String, Path, description = "Alarm id"),
    ),
    responses(
        (status = OK, description = "Alarm details", body = AlarmView),
        (status = BAD_REQUEST, description = "Malformed id", body = ErrorView),
        (status = NOT_FOUND, description = "Alarm not found", body = ErrorView),
    ),
)]
async fn get_alarm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AlarmView>> {
    current_view(&state, parse_id(&id)?)
}

/// Replace an alarm's definition.
#[utoipa::path(
    put,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = String, Path, description = "Alarm id"),
    ),
    request_body = AlarmRequest,
    responses(
        (status = OK, description = "Updated alarm", body = AlarmView),
        (status = NOT_FOUND, description = "Alarm not found", body = ErrorView),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid alarm definition", body = ErrorView),
    ),
)]
async fn put_alarm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<AlarmRequest>,
) -> ApiResult<Json<AlarmView>> {
    let id = parse_id(&id)?;
    let value = alarm_value(request, &state.defaults)?;
    state.manager.update(id, value).await?;
    current_view(&state, id)
}

/// Apply partial updates to an alarm.
#[utoipa::path(
    patch,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = String, Path, description = "Alarm id"),
    ),
    request_body = AlarmPatchRequest,
    responses(
        (status = OK, description = "Updated alarm", body = AlarmView),
        (status = NOT_FOUND, description = "Alarm not found", body = ErrorView),
    ),
)]
async fn patch_alarm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<AlarmPatchRequest>,
) -> ApiResult<Json<AlarmView>> {
    let id = parse_id(&id)?;
    if let Some(enabled) = request.enabled {
        state.manager.set_enabled(id, enabled).await?;
    }
    current_view(&state, id)
}

/// Delete an alarm.
#[utoipa::path(
    delete,
    path = "/alarms/{id}",
    tag = "alarms",
    params(
        ("id" = String, Path, description = "Alarm id"),
    ),
    responses(
        (status = NO_CONTENT, description = "Alarm deleted"),
        (status = NOT_FOUND, description = "Alarm not found", body = ErrorView),
    ),
)]
async fn delete_alarm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Dismiss the alarm's current occurrence.
///
/// Returns `null` when the alarm deleted itself on dismissal.
#[utoipa::path(
    post,
    path = "/alarms/{id}/dismiss",
    tag = "alarms",
    params(
        ("id" = String, Path, description = "Alarm id"),
    ),
    responses(
        (status = OK, description = "Alarm after dismissal", body = Option<AlarmView>),
        (status = NOT_FOUND, description = "Alarm not found", body = ErrorView),
        (status = CONFLICT, description = "Alarm is disabled", body = ErrorView),
    ),
)]
async fn dismiss_alarm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Option<AlarmView>>> {
    let id = parse_id(&id)?;
    state.manager.dismiss(id).await?;
    Ok(Json(state.manager.get(id).ok().as_ref().map(alarm_view)))
}

/// Snooze a ringing alarm.
#[utoipa::path(
    post,
    path = "/alarms/{id}/snooze",
    tag = "alarms",
    params(
        ("id" = String, Path, description = "Alarm id"),
    ),
    request_body = SnoozeRequest,
    responses(
        (status = OK, description = "Snoozed alarm", body = AlarmView),
        (status = NOT_FOUND, description = "Alarm not found", body = ErrorView),
        (status = CONFLICT, description = "Alarm is not ringing", body = ErrorView),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid duration", body = ErrorView),
    ),
)]
async fn snooze_alarm(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<SnoozeRequest>,
) -> ApiResult<Json<AlarmView>> {
    let id = parse_id(&id)?;
    let delta = request.minutes.map(|m| TimeDelta::minutes(m.into()));
    state.manager.snooze(id, delta).await?;
    current_view(&state, id)
}

/// Return the earliest scheduled wake.
#[utoipa::path(
    get,
    path = "/next-wake",
    tag = "schedule",
    responses(
        (status = OK, description = "Next wake, if any", body = NextWakeView),
    ),
)]
async fn next_wake(State(state): State<SharedState>) -> Json<NextWakeView> {
    Json(next_wake_view(
        state.manager.next_wake(),
        state.manager.clock(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use chrono::{FixedOffset, NaiveDate};
    use http::{Method, Request, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::clock::ManualClock;
    use crate::manager::AlarmsManager;
    use crate::store::MemoryStore;
    use crate::wake::WakeTimerError;
    use crate::wake::fake::FakeWakeTimer;

    struct Fixture {
        app: Router,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        timer: Arc<FakeWakeTimer>,
        manager: AlarmsManager,
    }

    fn fixture() -> Fixture {
        // Thursday 06:00 UTC.
        let clock = Arc::new(ManualClock::at_local(
            NaiveDate::from_ymd_opt(2024, 1, 4)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let timer = Arc::new(FakeWakeTimer::new());
        let manager = AlarmsManager::new(store.clone(), clock.clone(), timer.clone());
        let defaults = AlarmDefaults {
            snooze_minutes: 5,
            pre_alarm_minutes: 20,
            auto_silence_minutes: 15,
        };
        Fixture {
            app: router(SharedState::new(manager.clone(), defaults)),
            clock,
            store,
            timer,
            manager,
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, json)
    }

    async fn create(app: &Router, body: Value) -> String {
        let (status, view) = call(app, Method::POST, "/api/v0/alarms", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{view}");
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let f = fixture();
        let (status, body) = call(&f.app, Method::GET, "/api/v0/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("OK"));
    }

    #[tokio::test]
    async fn create_applies_defaults_and_lists() {
        let f = fixture();
        let id = create(
            &f.app,
            json!({"hour": 7, "minute": 15, "days": ["mon", "Wednesday"], "label": "work"}),
        )
        .await;

        let (status, list) = call(&f.app, Method::GET, "/api/v0/alarms", None).await;
        assert_eq!(status, StatusCode::OK);
        let alarm = &list[0];
        assert_eq!(alarm["id"], json!(id));
        assert_eq!(alarm["days"], json!(["mon", "wed"]));
        assert_eq!(alarm["snooze_minutes"], json!(5));
        assert_eq!(alarm["pre_alarm_minutes"], json!(20));
        assert_eq!(alarm["auto_silence_minutes"], json!(15));
        assert_eq!(alarm["state"], json!("enabled"));
        assert_eq!(alarm["trigger"], json!("2024-01-08T07:15:00Z"));
    }

    #[tokio::test]
    async fn invalid_definition_is_unprocessable() {
        let f = fixture();
        let (status, body) = call(
            &f.app,
            Method::POST,
            "/api/v0/alarms",
            Some(json!({"hour": 24, "minute": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("hour"));

        let (status, _) = call(
            &f.app,
            Method::POST,
            "/api/v0/alarms",
            Some(json!({"hour": 7, "minute": 0, "days": ["funday"]})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn malformed_and_unknown_ids() {
        let f = fixture();
        let (status, _) = call(&f.app, Method::GET, "/api/v0/alarms/not-an-id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = AlarmId::new(ulid::Ulid::new()).to_string();
        let (status, _) = call(&f.app, Method::GET, &format!("/api/v0/alarms/{unknown}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_disables_and_put_replaces() {
        let f = fixture();
        let id = create(&f.app, json!({"hour": 7, "minute": 0})).await;
        let uri = format!("/api/v0/alarms/{id}");

        let (status, view) = call(&f.app, Method::PATCH, &uri, Some(json!({"enabled": false}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], json!("disabled"));
        assert_eq!(view["enabled"], json!(false));

        let (status, view) = call(
            &f.app,
            Method::PUT,
            &uri,
            Some(json!({"hour": 8, "minute": 30, "label": "later"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], json!("enabled"));
        assert_eq!(view["hour"], json!(8));
        assert_eq!(view["label"], json!("later"));
    }

    #[tokio::test]
    async fn snooze_and_dismiss_flow() {
        let f = fixture();
        let id = create(&f.app, json!({"hour": 7, "minute": 0})).await;
        let uri = format!("/api/v0/alarms/{id}");

        let (status, _) = call(&f.app, Method::POST, &format!("{uri}/snooze"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let wake = f.timer.take_armed().unwrap();
        f.clock.set(wake.at);
        f.manager.on_wake(wake.id).await.unwrap();

        let (status, view) = call(
            &f.app,
            Method::POST,
            &format!("{uri}/snooze"),
            Some(json!({"minutes": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], json!("snoozed"));
        assert_eq!(view["next_wake"], json!("2024-01-04T07:03:00Z"));

        let (status, view) = call(&f.app, Method::POST, &format!("{uri}/dismiss"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], json!("disabled"));
    }

    #[tokio::test]
    async fn dismiss_self_deleting_alarm_returns_null() {
        let f = fixture();
        let id = create(
            &f.app,
            json!({"hour": 7, "minute": 0, "delete_after_dismiss": true}),
        )
        .await;

        let (status, view) = call(&f.app, Method::POST, &format!("/api/v0/alarms/{id}/dismiss"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view, Value::Null);

        let (status, _) = call(&f.app, Method::GET, &format!("/api/v0/alarms/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_not_found() {
        let f = fixture();
        let id = create(&f.app, json!({"hour": 7, "minute": 0})).await;
        let uri = format!("/api/v0/alarms/{id}");

        let (status, _) = call(&f.app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&f.app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn storage_failure_is_internal_error() {
        let f = fixture();
        f.store.set_failing(true);
        let (status, body) = call(
            &f.app,
            Method::POST,
            "/api/v0/alarms",
            Some(json!({"hour": 7, "minute": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("storage"));
    }

    #[tokio::test]
    async fn next_wake_reports_earliest_and_fault() {
        let f = fixture();
        let (_, empty) = call(&f.app, Method::GET, "/api/v0/next-wake", None).await;
        assert_eq!(empty["alarm_id"], Value::Null);

        create(&f.app, json!({"hour": 9, "minute": 0})).await;
        let early = create(&f.app, json!({"hour": 7, "minute": 0})).await;

        let (status, next) = call(&f.app, Method::GET, "/api/v0/next-wake", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(next["alarm_id"], json!(early));
        assert_eq!(next["local_time"], json!("2024-01-04 07:00"));
        assert_eq!(next["kind"], json!("normal"));
        assert_eq!(next["fault"], Value::Null);

        f.timer.set_failing(true);
        create(&f.app, json!({"hour": 6, "minute": 30})).await;
        let (_, next) = call(&f.app, Method::GET, "/api/v0/next-wake", None).await;
        assert!(next["fault"].is_string());
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let f = fixture();
        let (status, doc) = call(&f.app, Method::GET, "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/v0/alarms"));
        assert!(paths.contains_key("/api/v0/alarms/{id}/snooze"));
        assert!(paths.contains_key("/api/v0/next-wake"));
    }

    #[test]
    fn error_status_mapping() {
        let id = AlarmId::new(ulid::Ulid::new());
        assert_eq!(status_for(&Error::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&Error::SchedulingFault(WakeTimerError::Closed)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::StaleEvent {
                id,
                reason: crate::alarm::machine::Rejection::Stale { state: "firing" },
            }),
            StatusCode::CONFLICT
        );
    }
}
