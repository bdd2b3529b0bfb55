//! # Server Configuration
//!
//! Router, shared state and the OpenAPI document for the pipes API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{WorkspaceResolver, auth_middleware};
use crate::config::AppConfig;
use crate::handlers;
use crate::service::PipesService;
use crate::telemetry::trace_context_middleware;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: PipesService,
    pub workspaces: Arc<WorkspaceResolver>,
}

/// Creates the router: public health probes, workspace-authenticated
/// integration routes and the Swagger UI.
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/v1/integrations",
            get(handlers::integrations::list_integrations),
        )
        .route(
            "/api/v1/integrations/{vendor}/users",
            get(handlers::integrations::service_users),
        )
        .route(
            "/api/v1/integrations/{vendor}/accounts",
            get(handlers::integrations::service_accounts),
        )
        .route(
            "/api/v1/integrations/{vendor}/auth_url",
            get(handlers::integrations::auth_url),
        )
        .route(
            "/api/v1/integrations/{vendor}/authorizations",
            post(handlers::integrations::create_authorization)
                .delete(handlers::integrations::delete_authorization),
        )
        .route(
            "/api/v1/integrations/{vendor}/pipes/{pipe}",
            get(handlers::pipes::get_pipe)
                .post(handlers::pipes::create_pipe)
                .put(handlers::pipes::update_pipe)
                .delete(handlers::pipes::delete_pipe),
        )
        .route(
            "/api/v1/integrations/{vendor}/pipes/{pipe}/run",
            post(handlers::pipes::run_pipe),
        )
        .route(
            "/api/v1/integrations/{vendor}/pipes/{pipe}/log",
            get(handlers::pipes::pipe_log),
        )
        .route(
            "/api/v1/integrations/{vendor}/pipes/{pipe}/idmappings",
            delete(handlers::pipes::clear_id_mappings),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace_context_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Serves until `shutdown` fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "pipes API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_token",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Basic)
                    .description(Some(
                        "Platform API token as the basic auth user, or as a Bearer token",
                    ))
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health,
        crate::handlers::ready,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::service_users,
        crate::handlers::integrations::service_accounts,
        crate::handlers::integrations::auth_url,
        crate::handlers::integrations::create_authorization,
        crate::handlers::integrations::delete_authorization,
        crate::handlers::pipes::get_pipe,
        crate::handlers::pipes::create_pipe,
        crate::handlers::pipes::update_pipe,
        crate::handlers::pipes::delete_pipe,
        crate::handlers::pipes::run_pipe,
        crate::handlers::pipes::pipe_log,
        crate::handlers::pipes::clear_id_mappings,
    ),
    components(
        schemas(
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::ReadyResponse,
            crate::handlers::pipes::RunResponse,
            crate::handlers::integrations::UsersResponse,
            crate::handlers::integrations::AccountsResponse,
            crate::handlers::integrations::AuthUrlResponse,
            crate::service::IntegrationView,
            crate::service::PipeView,
            crate::service::PipeUpdate,
            crate::scheduler::RunTicket,
            crate::authorization::AuthParams,
            crate::pipes::Pipe,
            crate::pipes::UsersSelector,
            crate::pipes::Status,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Pipes Sync API",
        description = "Configure and run synchronization pipes between the platform and third-party services",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
