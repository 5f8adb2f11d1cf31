use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
}

// ─── POST /api/auth/login ────────────────────────────────────────

/// The classic credential-validity side channel: an unknown username fails
/// before any hash work happens, a known one pays the full verification
/// cost. Routed through the `/api/auth/*` timing policy so both outcomes
/// leave the process at the same apparent latency.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let stored = state.users.read().get(&req.username).cloned();

    let Some(stored) = stored else {
        return Err(AppError::Unauthorized("invalid credentials".into()));
    };

    if !verify_password(&stored, &req.password).await {
        return Err(AppError::Unauthorized("invalid credentials".into()));
    }

    Ok(Json(LoginResponse {
        token: uuid::Uuid::new_v4().to_string(),
        username: req.username,
    }))
}

/// Stand-in for a KDF round-trip against the identity provider. The cost
/// is what matters here, not the comparison itself — constant-time secret
/// comparison is a separate, lower-level concern.
async fn verify_password(stored: &str, supplied: &str) -> bool {
    tokio::time::sleep(Duration::from_millis(25)).await;
    stored == supplied
}

/// Demo identities.
pub fn seed(state: &AppState) {
    let mut users = state.users.write();
    users.insert("analyst".to_owned(), "correct-horse".to_owned());
    users.insert("supervisor".to_owned(), "battery-staple".to_owned());
}
