use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AppError;
use crate::AppState;

// ─── Domain types ────────────────────────────────────────────────

/// Minimal stand-in for the back office's loan account record. The real
/// persistence layer is an external collaborator; an in-memory map is
/// enough to give the timing middleware realistic fast-miss / slow-hit
/// paths to protect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub holder: String,
    pub email: String,
    pub status: String,
    pub balance_cents: i64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub holder: String,
    pub email: String,
    #[serde(default)]
    pub balance_cents: i64,
}

// ─── GET /api/accounts/:id ───────────────────────────────────────

/// The endpoint the timing protection exists for. A miss returns in
/// microseconds; a hit pays a record fetch plus an authorization check —
/// an order of magnitude slower. Without normalization that gap tells an
/// attacker which account ids exist.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Account>, AppError> {
    let account = state.accounts.read().get(&id).cloned();

    let Some(account) = account else {
        // fast path: no such id, reply immediately
        return Err(AppError::NotFound(format!("account '{id}' not found")));
    };

    authorize_access(&account).await?;
    Ok(Json(account))
}

/// Stand-in for the analyst-role ownership check the real back office runs
/// against its session store.
async fn authorize_access(account: &Account) -> Result<(), AppError> {
    tokio::time::sleep(Duration::from_millis(12)).await;
    if account.status == "frozen" {
        return Err(AppError::Forbidden(format!(
            "account '{}' is frozen pending review",
            account.id
        )));
    }
    Ok(())
}

// ─── POST /api/accounts ──────────────────────────────────────────

pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    if req.holder.trim().is_empty() {
        return Err(AppError::BadRequest("holder name is required".into()));
    }

    // full v4 uuid so the id collapses under the `:uuid` endpoint key
    let account = Account {
        id: uuid::Uuid::new_v4().to_string(),
        holder: req.holder,
        email: req.email,
        status: "active".into(),
        balance_cents: req.balance_cents,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    state
        .accounts
        .write()
        .insert(account.id.clone(), account.clone());

    Ok((StatusCode::CREATED, Json(account)))
}

// ─── Seed data ───────────────────────────────────────────────────

/// A handful of deterministic records so the demo endpoints answer
/// something out of the box.
pub fn seed(state: &AppState) {
    let mut accounts = state.accounts.write();
    for (id, holder, email, status, balance) in [
        ("10001", "Ana Lima", "ana.lima@example.com", "active", 1_250_000),
        ("10002", "Bruno Costa", "bruno.costa@example.com", "active", 89_900),
        ("10003", "Carla Souza", "carla.souza@example.com", "frozen", 0),
    ] {
        accounts.insert(
            id.to_owned(),
            Account {
                id: id.to_owned(),
                holder: holder.to_owned(),
                email: email.to_owned(),
                status: status.to_owned(),
                balance_cents: balance,
                created_at: "2026-01-15T09:00:00Z".to_owned(),
            },
        );
    }
}
