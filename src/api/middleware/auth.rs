use crate::AppState;
use crate::api::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub const API_TOKEN_HEADER: &str = "X-API-Token";

/// Rejects requests without a matching `X-API-Token` header. A no-op when no
/// token is configured.
pub async fn api_token_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(API_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided != Some(expected) {
        tracing::warn!(
            "Rejected {} {}: invalid or missing API token",
            req.method(),
            req.uri().path()
        );
        return Err(AppError::Unauthorized(
            "Invalid or missing API token".to_string(),
        ));
    }

    Ok(next.run(req).await)
}
