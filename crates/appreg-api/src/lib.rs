//! appreg-api — REST surface of the application registry.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/registry`, `/api/v1/registry/register` | Register an instance |
//! | POST | `/api/v1/registry/verify` | Verify an instance's version and hash |
//! | GET | `/api/v1/registry/{instance_id}` | Instance hierarchy |
//! | POST | `/api/v1/registry/active` | Is the instance serving a friendly name |
//! | PUT | `/api/v1/registry/instance-active-flag` | Mark started / stopped |
//! | GET | `/api/v1/registry/whois/{instance_id}` | Application name |
//! | GET | `/api/v1/registry/location/{instance_id}` | Install path and machine |
//! | PUT | `/api/v1/registry/heartbeat` | Count a heartbeat |
//! | POST | `/api/v1/discovery` | Record URLs and routes |
//! | GET | `/api/v1/discovery/urls/{friendly_name}` | Healthy URLs |
//! | GET | `/api/v1/discovery/routes/{friendly_name}` | Routes |
//! | GET | `/api/v1/discovery/health` | Health of every application |
//! | GET | `/api/v1/discovery/health/{friendly_name}` | Health of one application |
//! | GET | `/api/v1/discovery/health-latest` | Latest version per application |
//! | GET | `/microserviceHealth` | The registry's own health |
//!
//! Service failures answer `204 No Content`; malformed input answers `400`.

pub mod handlers;
pub mod routes;

use axum::Router;
use axum::routing::{get, post, put};

use appreg_registry::Registry;

pub use routes::{CONTROLLERS, self_discovery_entries};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Registry,
}

/// Build the complete router.
pub fn build_router(registry: Registry) -> Router {
    let state = ApiState { registry };

    let api_routes = Router::new()
        .route("/registry", post(handlers::register))
        .route("/registry/register", post(handlers::register))
        .route("/registry/verify", post(handlers::verify))
        .route("/registry/active", post(handlers::is_active))
        .route("/registry/instance-active-flag", put(handlers::set_active_flag))
        .route("/registry/heartbeat", put(handlers::heartbeat))
        .route("/registry/whois/{instance_id}", get(handlers::who_is))
        .route("/registry/location/{instance_id}", get(handlers::location))
        .route("/registry/{instance_id}", get(handlers::hierarchy))
        .route("/discovery", post(handlers::add_discovery_records))
        .route("/discovery/urls/{friendly_name}", get(handlers::urls))
        .route("/discovery/routes/{friendly_name}", get(handlers::routes))
        .route("/discovery/health", get(handlers::all_health))
        .route("/discovery/health/{friendly_name}", get(handlers::health_by_friendly_name))
        .route("/discovery/health-latest", get(handlers::latest_health));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/microserviceHealth", get(handlers::service_health))
        .with_state(state)
}
