//! REST API handlers.
//!
//! Successful calls return an [`ApiResponse`] envelope. A service error is
//! logged and answered with `204 No Content`; unreadable input gets `400`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use appreg_registry::{DiscoveryEntry, RegistrationRequest, RegistryError};
use appreg_store::{HEALTHY, RowId};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data: Some(data), error: None })
    }
}

fn bad_request(msg: impl Into<String>) -> Response {
    let body = ApiResponse::<()> { success: false, data: None, error: Some(msg.into()) };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn no_content(operation: &'static str, err: RegistryError) -> Response {
    warn!(operation, error = %err, "request failed");
    StatusCode::NO_CONTENT.into_response()
}

fn respond<T: Serialize>(operation: &'static str, result: Result<T, RegistryError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => no_content(operation, e),
    }
}

// ── Request bodies ─────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct VerifyRequest {
    pub instance_id: RowId,
    pub version: String,
    pub hash: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ActiveRequest {
    pub friendly_name: String,
    pub instance_id: RowId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ActiveFlagRequest {
    pub instance_id: RowId,
    pub starting: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HeartbeatRequest {
    pub instance_id: RowId,
}

#[derive(Debug, Default, Deserialize)]
pub struct UrlsQuery {
    pub https_only: Option<bool>,
}

// ── Registry ───────────────────────────────────────────────────

/// POST /api/v1/registry, /api/v1/registry/register
pub async fn register(
    State(state): State<ApiState>,
    body: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    let required = [
        ("application_name", &req.application_name),
        ("version", &req.version),
        ("install_path", &req.install_path),
        ("machine_name", &req.machine_name),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return bad_request(format!("{field} is required"));
    }
    respond("register", state.registry.registration.register(&req).await)
}

/// POST /api/v1/registry/verify
pub async fn verify(State(state): State<ApiState>, body: Result<Json<VerifyRequest>, JsonRejection>) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    respond(
        "verify",
        state.registry.registration.verify(req.instance_id, &req.version, &req.hash).await,
    )
}

/// GET /api/v1/registry/{instance_id}
pub async fn hierarchy(State(state): State<ApiState>, id: Result<Path<RowId>, PathRejection>) -> Response {
    match id {
        Ok(Path(id)) => respond("hierarchy", state.registry.registration.hierarchy(id).await),
        Err(e) => bad_request(e.body_text()),
    }
}

/// POST /api/v1/registry/active
pub async fn is_active(State(state): State<ApiState>, body: Result<Json<ActiveRequest>, JsonRejection>) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    if req.friendly_name.trim().is_empty() {
        return bad_request("friendly_name is required");
    }
    respond(
        "is_active",
        state.registry.discovery.is_active(&req.friendly_name, req.instance_id).await,
    )
}

/// PUT /api/v1/registry/instance-active-flag
pub async fn set_active_flag(
    State(state): State<ApiState>,
    body: Result<Json<ActiveFlagRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    respond(
        "set_active_flag",
        state
            .registry
            .registration
            .set_active_flag(req.instance_id, req.starting)
            .await
            .map(|()| req.starting),
    )
}

/// GET /api/v1/registry/whois/{instance_id}
pub async fn who_is(State(state): State<ApiState>, id: Result<Path<RowId>, PathRejection>) -> Response {
    match id {
        Ok(Path(id)) => respond("who_is", state.registry.registration.who_is(id).await),
        Err(e) => bad_request(e.body_text()),
    }
}

/// GET /api/v1/registry/location/{instance_id}
pub async fn location(State(state): State<ApiState>, id: Result<Path<RowId>, PathRejection>) -> Response {
    match id {
        Ok(Path(id)) => respond("location", state.registry.registration.location(id).await),
        Err(e) => bad_request(e.body_text()),
    }
}

/// PUT /api/v1/registry/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    respond(
        "heartbeat",
        state
            .registry
            .registration
            .increment_heartbeat(req.instance_id)
            .await
            .map(|instance| instance.heartbeats),
    )
}

// ── Discovery ──────────────────────────────────────────────────

/// POST /api/v1/discovery
pub async fn add_discovery_records(
    State(state): State<ApiState>,
    body: Result<Json<DiscoveryEntry>, JsonRejection>,
) -> Response {
    let Json(entry) = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    if entry.instance_id == 0 || entry.version_id == 0 {
        return bad_request("instance_id and version_id are required");
    }
    if entry.friendly_name.trim().is_empty() {
        return bad_request("friendly_name is required");
    }
    respond(
        "add_discovery_records",
        state.registry.discovery.add_discovery_records(&entry).await,
    )
}

/// GET /api/v1/discovery/urls/{friendly_name}?https_only=
pub async fn urls(
    State(state): State<ApiState>,
    Path(friendly_name): Path<String>,
    query: Result<Query<UrlsQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => return bad_request(e.body_text()),
    };
    let discovery = &state.registry.discovery;
    let https_only = query.https_only.unwrap_or(discovery.config().force_https_only);
    respond("urls", discovery.urls_for_friendly_name(&friendly_name, https_only).await)
}

/// GET /api/v1/discovery/routes/{friendly_name}
pub async fn routes(State(state): State<ApiState>, Path(friendly_name): Path<String>) -> Response {
    respond("routes", state.registry.discovery.routes(&friendly_name).await)
}

/// GET /api/v1/discovery/health
pub async fn all_health(State(state): State<ApiState>) -> Response {
    respond("all_health", state.registry.discovery.all_application_health().await)
}

/// GET /api/v1/discovery/health/{friendly_name}
pub async fn health_by_friendly_name(State(state): State<ApiState>, Path(friendly_name): Path<String>) -> Response {
    respond(
        "health_by_friendly_name",
        state.registry.discovery.application_health_by_friendly_name(&friendly_name).await,
    )
}

/// GET /api/v1/discovery/health-latest
pub async fn latest_health(State(state): State<ApiState>) -> Response {
    respond("latest_health", state.registry.discovery.latest_application_health().await)
}

/// GET /microserviceHealth
pub async fn service_health() -> impl IntoResponse {
    Json(serde_json::json!({ "Status": HEALTHY }))
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use appreg_core::RegistryConfig;
    use appreg_registry::Registry;
    use appreg_store::{Directory, InitOptions, Store};

    use super::*;

    async fn test_state() -> ApiState {
        let directory = Directory::new(Store::open_in_memory().unwrap());
        directory.initialize(InitOptions::default()).await.unwrap();
        ApiState { registry: Registry::new(directory, &RegistryConfig::default()) }
    }

    fn request(name: &str) -> RegistrationRequest {
        RegistrationRequest {
            application_name: name.to_string(),
            version: "1.0.0".to_string(),
            hash: "h".to_string(),
            install_path: format!("/opt/{name}"),
            machine_name: "host-a".to_string(),
            build_time: None,
        }
    }

    async fn json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_returns_ids() {
        let state = test_state().await;
        let resp = register(State(state.clone()), Ok(Json(request("billing")))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["upgraded"], true);
        assert!(body["data"]["instance_id"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn register_with_blank_name_is_bad_request() {
        let state = test_state().await;
        let resp = register(State(state), Ok(Json(request(" ")))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_denied_is_no_content() {
        let directory = Directory::new(Store::open_in_memory().unwrap());
        directory.initialize(InitOptions::default()).await.unwrap();
        let mut config = RegistryConfig::default();
        config.registration.allow_new_application = false;
        let state = ApiState { registry: Registry::new(directory, &config) };

        let resp = register(State(state), Ok(Json(request("billing")))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_instance_lookups_are_no_content() {
        let state = test_state().await;
        let resp = who_is(State(state.clone()), Ok(Path(9))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = location(State(state.clone()), Ok(Path(9))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = hierarchy(State(state.clone()), Ok(Path(9))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = set_active_flag(State(state), Ok(Json(ActiveFlagRequest { instance_id: 9, starting: true }))).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn verify_reports_outcome() {
        let state = test_state().await;
        let ids = state.registry.registration.register(&request("billing")).await.unwrap();

        let resp = verify(
            State(state),
            Ok(Json(VerifyRequest { instance_id: ids.instance_id, version: "1.0.0".to_string(), hash: "h".to_string() })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["data"], "NotActiveApplication");
    }

    #[tokio::test]
    async fn heartbeat_returns_count() {
        let state = test_state().await;
        let ids = state.registry.registration.register(&request("billing")).await.unwrap();

        let resp = heartbeat(State(state), Ok(Json(HeartbeatRequest { instance_id: ids.instance_id }))).await;
        assert_eq!(json(resp).await["data"], 2);
    }

    #[tokio::test]
    async fn discovery_without_ids_is_bad_request() {
        let state = test_state().await;
        let entry = DiscoveryEntry {
            instance_id: 0,
            version_id: 0,
            friendly_name: "Billing".to_string(),
            controller_name: "Billing".to_string(),
            controller_route: "api/billing".to_string(),
            urls: Vec::new(),
            methods: Vec::new(),
        };
        let resp = add_discovery_records(State(state), Ok(Json(entry))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn urls_for_unknown_name_is_empty_list() {
        let state = test_state().await;
        let resp = urls(State(state), Path("Nope".to_string()), Ok(Query(UrlsQuery::default()))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn service_health_reports_healthy() {
        let resp = service_health().await.into_response();
        assert_eq!(json(resp).await, serde_json::json!({ "Status": "Healthy" }));
    }
}
