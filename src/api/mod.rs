// src/api/mod.rs — REST API under /api/v1

pub mod auth;
pub mod handlers;
pub mod types;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app::AppContext;
use crate::infra::config::ServerConfig;
pub use types::{ApiError, ErrorResponse};

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Build the axum router with all API routes.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = cors_layer(&ctx.config.server);

    let auth_routes = Router::new()
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .route("/register", post(handlers::register))
        .route("/me", get(handlers::me))
        .route("/change-password", post(handlers::change_password))
        .route("/logout", post(handlers::logout))
        .route("/password-reset-request", post(handlers::password_reset_request))
        .route("/password-reset-confirm", post(handlers::password_reset_confirm));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .nest("/auth", auth_routes)
        .route("/clinics", get(handlers::list_clinics).post(handlers::create_clinic))
        .route("/clinics/{id}", get(handlers::get_clinic).put(handlers::update_clinic))
        .route("/customers", get(handlers::list_customers).post(handlers::create_customer))
        .route(
            "/customers/{id}",
            get(handlers::get_customer).put(handlers::update_customer),
        )
        .route("/sessions", get(handlers::list_sessions).post(handlers::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::get_session)
                .put(handlers::update_session)
                .delete(handlers::delete_session),
        )
        .route(
            "/recordings",
            get(handlers::list_recordings).post(handlers::create_upload),
        )
        .route(
            "/recordings/{id}",
            get(handlers::get_recording).delete(handlers::delete_recording),
        )
        .route("/recordings/{id}/complete", post(handlers::complete_upload))
        .route("/recordings/{id}/download", get(handlers::recording_download))
        .route(
            "/transcriptions",
            get(handlers::list_transcriptions).post(handlers::start_transcription),
        )
        .route("/transcriptions/stats", get(handlers::transcription_stats))
        .route("/transcriptions/{id}", get(handlers::transcription_status))
        .route("/transcriptions/{id}/result", get(handlers::transcription_result))
        .route("/transcriptions/{id}/retry", post(handlers::retry_transcription))
        .route("/analyses", get(handlers::list_analyses).post(handlers::start_analysis))
        .route("/analyses/batch", post(handlers::batch_analysis))
        .route("/analyses/stats", get(handlers::analysis_stats))
        .route("/analyses/{id}", get(handlers::analysis_status))
        .route("/analyses/{id}/result", get(handlers::analysis_result))
        .route("/analyses/{id}/retry", post(handlers::retry_analysis))
        .route("/analyses/{id}/suggestions", get(handlers::analysis_suggestions))
        .route("/improvement/success-patterns", get(handlers::success_patterns))
        .route(
            "/improvement/performance-trends/{id}",
            get(handlers::performance_trend),
        )
        .route("/dashboard/executive", get(handlers::executive_dashboard))
        .route("/dashboard/operations", get(handlers::operations_dashboard))
        .route("/dashboard/counselor/{id}", get(handlers::counselor_dashboard));

    Router::new()
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(ctx)
}

/// Bind and serve until ctrl-c.
pub async fn start_server(ctx: AppContext, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let router = build_router(ctx);

    tracing::info!("API server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down API server");
        })
        .await?;
    Ok(())
}
