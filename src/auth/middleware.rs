use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument, warn};

use crate::shared::{AppError, AppState};

/// The token of an `Authorization: Bearer` header; `None` when the header is absent
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AppError> {
    let Some(header) = headers.get("Authorization") else {
        return Ok(None);
    };
    header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(Some)
        .ok_or_else(|| {
            warn!("Invalid Authorization header format (expected Bearer token)");
            AppError::Unauthorized("Invalid authorization header format".to_string())
        })
}

/// Validates the `Authorization: Bearer` header and adds the `AuthUser` to the
/// request. Handlers extract it with `Extension(user): Extension<AuthUser>`.
#[instrument(skip(state, req, next), fields(uri = %req.uri()))]
pub async fn jwt_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?.ok_or_else(|| {
        warn!("Missing Authorization header in request");
        AppError::Unauthorized("Missing authorization header".to_string())
    })?;

    let user = state.token_config.validate_token(token).map_err(|e| {
        warn!(error = %e, "JWT authentication failed");
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;

    debug!(uid = %user.uid, "Authentication successful, adding user to request");
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
