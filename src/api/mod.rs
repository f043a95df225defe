//! Voirie REST API
//!
//! HTTP API layer, built with Axum. Authentication is a bearer session
//! token obtained from `POST /api/auth/login`.
//!
//! # Endpoints
//!
//! ## Accounts
//! - `/api/auth/*` - Registration, login, logout, lockout
//! - `/api/users/*` - User directory
//!
//! ## Signalements
//! - `/api/signalements/*` - Reports, status changes, map, proximity
//! - `/api/historiques/*` - Status history
//! - `/api/photos/*` - Photos attached to reports
//!
//! ## Works
//! - `/api/entreprises/*` - Contractors
//! - `/api/actions/*` - Works records
//! - `/api/configurations/*` - Price per m² and budget estimation
//!
//! ## Manager
//! - `/api/manager/dashboard/*` - Aggregates
//! - `/api/notifications/*` - Per-user notifications
//! - `GET /api/export/signalements` - CSV, JSON or NDJSON export
//! - `POST /api/import/signalements` - CSV import
//! - `/api/sync/*` - Remote synchronization
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /ws` - Live events
//!
//! # Example
//!
//! ```rust,ignore
//! use voirie::api::{serve, AppState};
//! use voirie::config::Config;
//! use voirie::storage::{Store, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = Store::open(&StoreConfig::new(&config.storage.database_path))?;
//!     serve(AppState::new(config, store)).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use auth::{CurrentUser, ManagerUser};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::websocket::websocket_handler;

/// Upload and import bodies (10 MB)
const UPLOAD_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    use routes::{
        actions, auth, configurations, dashboard, entreprises, export, health, import,
        notifications, photos, signalements, sync,
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/validate", get(auth::validate))
        .route("/update/:id", put(auth::update_user))
        .route("/unlock/:email", post(auth::unlock))
        .route("/logout-all/:id", post(auth::logout_all));

    let user_routes = Router::new()
        .route("/", get(auth::list_users))
        .route("/me", get(auth::me))
        .route("/:id", get(auth::get_user).delete(auth::delete_user));

    let signalement_routes = Router::new()
        .route("/", get(signalements::list).post(signalements::create))
        .route("/map", get(signalements::map))
        .route("/statistics", get(signalements::statistics))
        .route("/status-options", get(signalements::status_options))
        .route("/location", get(signalements::by_location))
        .route("/status/:code", get(signalements::by_status))
        .route(
            "/:id",
            get(signalements::get)
                .put(signalements::update)
                .delete(signalements::delete),
        )
        .route("/:id/status", put(signalements::change_status))
        .route("/:id/history", get(signalements::history));

    let historique_routes = Router::new()
        .route(
            "/:id",
            get(signalements::get_history).delete(signalements::delete_history),
        )
        .route("/signalement/:id", get(signalements::history))
        .route("/signalement/:id/dernier", get(signalements::latest_history));

    let photo_routes = Router::new()
        .route("/signalement/:id", get(photos::list).post(photos::add))
        .route("/signalement/:id/principale", get(photos::principale))
        .route("/signalement/:id/reorder", put(photos::reorder))
        .route(
            "/signalement/:id/upload",
            post(photos::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/:id", get(photos::get).delete(photos::delete))
        .route("/:id/principale", put(photos::set_principale));

    let entreprise_routes = Router::new()
        .route("/", get(entreprises::list).post(entreprises::create))
        .route("/active", get(entreprises::active))
        .route("/top-rated", get(entreprises::top_rated))
        .route("/by-specialite", get(entreprises::by_specialite))
        .route(
            "/:id",
            get(entreprises::get)
                .put(entreprises::update)
                .delete(entreprises::delete),
        )
        .route("/:id/activate", post(entreprises::activate))
        .route("/:id/deactivate", post(entreprises::deactivate))
        .route("/:id/update-note", post(entreprises::update_note));

    let action_routes = Router::new()
        .route("/", post(actions::create))
        .route("/en-cours", get(actions::en_cours))
        .route("/en-retard", get(actions::en_retard))
        .route("/statistics", get(actions::statistics))
        .route("/signalement/:id", get(actions::for_signalement))
        .route("/entreprise/:id", get(actions::for_entreprise))
        .route(
            "/:id",
            get(actions::get).put(actions::update).delete(actions::delete),
        )
        .route("/:id/assigner-entreprise", post(actions::assign))
        .route("/:id/demarrer", post(actions::start))
        .route("/:id/terminer", post(actions::finish))
        .route("/:id/budget", put(actions::update_budget))
        .route("/:id/photos-avant", post(actions::photos_avant))
        .route("/:id/photos-apres", post(actions::photos_apres));

    let configuration_routes = Router::new()
        .route("/", get(configurations::list))
        .route(
            "/prix-par-m2",
            get(configurations::get_prix).put(configurations::set_prix),
        )
        .route("/calculer-budget", post(configurations::calculer_budget))
        .route("/by-key/:cle", get(configurations::get_by_key))
        .route(
            "/:id",
            get(configurations::get)
                .put(configurations::update)
                .delete(configurations::delete),
        );

    let dashboard_routes = Router::new()
        .route("/statistics", get(dashboard::statistics))
        .route("/signalements", get(dashboard::signalements))
        .route("/budget-summary", get(dashboard::budget))
        .route("/performance", get(dashboard::performance));

    let notification_routes = Router::new()
        .route("/", get(notifications::list))
        .route("/unread-count", get(notifications::unread_count))
        .route("/read-all", put(notifications::mark_all_read))
        .route("/send", post(notifications::send))
        .route("/broadcast", post(notifications::broadcast))
        .route("/:id", axum::routing::delete(notifications::delete))
        .route("/:id/read", put(notifications::mark_read));

    let sync_routes = Router::new()
        .route("/all", post(sync::sync_all))
        .route("/push", post(sync::push))
        .route("/pull", post(sync::pull))
        .route("/status", get(sync::status));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .nest("/signalements", signalement_routes)
        .nest("/historiques", historique_routes)
        .nest("/photos", photo_routes)
        .nest("/entreprises", entreprise_routes)
        .nest("/actions", action_routes)
        .nest("/configurations", configuration_routes)
        .nest("/manager/dashboard", dashboard_routes)
        .nest("/notifications", notification_routes)
        .nest("/sync", sync_routes)
        .route("/export/signalements", get(export::export_signalements))
        .route(
            "/import/signalements",
            post(import::import_signalements).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        );

    let health_routes = Router::new()
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/", get(health::full_health));

    let cors = cors_layer(&state.config.api.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health_routes)
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Permissive when no origin is configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::permissive().allow_origin(allowed)
    }
}

/// Start the API server
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Voirie API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Voirie API shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::testing;
    use crate::storage::Store;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, AppState) {
        let store = Store::open_in_memory().unwrap();
        let state = AppState::new(Config::default(), store);
        (build_router(state.clone()), state)
    }

    fn token_for(state: &AppState, email: &str) -> String {
        state
            .auth
            .login(email, testing::PASSWORD, None, None)
            .unwrap()
            .token
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _state) = create_test_app();

        let response = app
            .oneshot(request("GET", "/health/live", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _state) = create_test_app();

        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sync"], "disabled");
    }

    #[tokio::test]
    async fn test_register_login_me() {
        let (app, _state) = create_test_app();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/auth/register",
                None,
                Some(r#"{"email":"rakoto@example.mg","password":"secret123","name":"Rakoto"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/auth/login",
                None,
                Some(r#"{"email":"rakoto@example.mg","password":"secret123"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap().to_string();

        let response = app
            .oneshot(request("GET", "/api/users/me", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["email"], "rakoto@example.mg");
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let (app, state) = create_test_app();
        testing::citizen(&state.store, "user@example.mg");

        let response = app
            .oneshot(request(
                "POST",
                "/api/auth/login",
                None,
                Some(r#"{"email":"user@example.mg","password":"wrong-password"}"#),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert!(body["error"]["code"].is_string());
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_create_signalement_requires_session() {
        let (app, _state) = create_test_app();

        let response = app
            .oneshot(request(
                "POST",
                "/api/signalements",
                None,
                Some(r#"{"latitude":-18.91,"longitude":47.52,"description":"Nid de poule"}"#),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_and_list_signalements() {
        let (app, state) = create_test_app();
        testing::citizen(&state.store, "user@example.mg");
        let token = token_for(&state, "user@example.mg");

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/signalements",
                Some(&token),
                Some(r#"{"latitude":-18.91,"longitude":47.52,"description":"Nid de poule"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["status"], "nouveau");

        let response = app
            .oneshot(request("GET", "/api/signalements?status=nouveau", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = json_body(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_status_is_bad_request() {
        let (app, _state) = create_test_app();

        let response = app
            .oneshot(request("GET", "/api/signalements/status/perdu", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dashboard_requires_manager() {
        let (app, state) = create_test_app();
        testing::citizen(&state.store, "user@example.mg");
        testing::manager(&state.store);
        let user_token = token_for(&state, "user@example.mg");
        let manager_token = token_for(&state, "manager@voirie.mg");

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/manager/dashboard/statistics",
                Some(&user_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request(
                "GET",
                "/api/manager/dashboard/statistics",
                Some(&manager_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_manager_changes_status() {
        let (app, state) = create_test_app();
        testing::manager(&state.store);
        let token = token_for(&state, "manager@voirie.mg");
        let s = testing::signalement(&state.store, None);

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/signalements/{}/status", s.id),
                Some(&token),
                Some(r#"{"status":"en_cours","commentaire":"Équipe envoyée"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "en_cours");

        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/historiques/signalement/{}/dernier", s.id),
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_calculer_budget() {
        let (app, _state) = create_test_app();

        let response = app
            .oneshot(request(
                "POST",
                "/api/configurations/calculer-budget",
                None,
                Some(r#"{"niveau":3,"surface":2.5}"#),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["budget"].as_f64().unwrap(), 75000.0);
    }

    #[tokio::test]
    async fn test_sync_disabled() {
        let (app, state) = create_test_app();
        testing::manager(&state.store);
        let token = token_for(&state, "manager@voirie.mg");

        let response = app
            .clone()
            .oneshot(request("POST", "/api/sync/all", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app
            .oneshot(request("GET", "/api/sync/status", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["enabled"], false);
    }

    #[tokio::test]
    async fn test_export_csv_attachment() {
        let (app, state) = create_test_app();
        testing::manager(&state.store);
        let token = token_for(&state, "manager@voirie.mg");
        testing::signalement(&state.store, None);

        let response = app
            .oneshot(request(
                "GET",
                "/api/export/signalements?format=csv&since=now-7d",
                Some(&token),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"signalements_"));
        assert!(disposition.ends_with(".csv\""));
    }
}
