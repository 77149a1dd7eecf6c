use axum::{extract::State, http::HeaderMap, Json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::middleware::bearer_token;
use super::types::{AuthUser, SignInRequest, SignInResponse};
use crate::shared::{AppError, AppState};

/// POST /session
///
/// Without a bearer token this creates a new identity with a server-minted uid.
/// With a valid one it renews the token for the same uid. Either way the user
/// record exists afterwards, and an existing record keeps its name.
#[instrument(name = "sign_in", skip(state, headers, request))]
pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Option<Json<SignInRequest>>,
) -> Result<Json<SignInResponse>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let uid = match bearer_token(&headers)? {
        Some(token) => {
            let current = state.token_config.validate_token(token).map_err(|e| {
                warn!(error = %e, "Token renewal refused");
                AppError::Unauthorized("Invalid or expired token".to_string())
            })?;
            current.uid
        }
        None => Uuid::new_v4().to_string(),
    };
    let requested_name = match request.display_name {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => state.display_names.generate().await,
    };

    let user = state
        .score_service
        .ensure_user(&uid, &requested_name)
        .await?;
    let auth_user = AuthUser {
        uid: user.uid,
        display_name: user.display_name,
    };
    let token = state.token_config.create_token(&auth_user)?;

    info!(uid = %auth_user.uid, display_name = %auth_user.display_name, "Signed in");

    Ok(Json(SignInResponse {
        token,
        uid: auth_user.uid,
        display_name: auth_user.display_name,
    }))
}
