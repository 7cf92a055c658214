pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::converter::Converter;
use crate::services::scratch::ScratchSpace;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// Headroom for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::convert::convert_document,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::convert::ConvertUpload,
            api::handlers::convert::BundleFormat,
        )
    ),
    modifiers(&ApiTokenScheme),
    tags(
        (name = "system", description = "Service status"),
        (name = "convert", description = "Document conversion")
    )
)]
pub struct ApiDoc;

struct ApiTokenScheme;

impl Modify for ApiTokenScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    api::middleware::auth::API_TOKEN_HEADER,
                ))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub converter: Arc<dyn Converter>,
    pub scratch: ScratchSpace,
}

impl AppState {
    pub fn new(config: AppConfig, converter: Arc<dyn Converter>) -> Self {
        let scratch = ScratchSpace::new(config.temp_dir.clone());
        Self {
            config: Arc::new(config),
            converter,
            scratch,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route(
            "/convert",
            post(api::handlers::convert::convert_document).layer(DefaultBodyLimit::max(
                state.config.max_file_size.saturating_add(MULTIPART_OVERHEAD),
            )),
        )
        .layer(from_fn_with_state(
            state.clone(),
            api::middleware::auth::api_token_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .nest("/api/v1", api_v1)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
