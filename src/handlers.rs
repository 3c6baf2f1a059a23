// handlers.rs
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::{
    Couple, CoupleUpdate, CouplesResponse, ResetResponse, ResultsStatus, Snapshot, VoteRequest,
    VoteResponse,
};
use crate::state::AppState;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let supplied = headers
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|value| value.to_str().ok());

    match supplied {
        Some(password) if state.admin_password_matches(password) => Ok(()),
        _ => {
            warn!("Rejected admin request with missing or wrong password");
            Err(AppError::Unauthorized)
        }
    }
}

/// Full application state, contestants sorted by id.
pub async fn get_data(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    let mut snapshot = state.store().snapshot().await?;
    snapshot.sort();
    Ok(Json(snapshot))
}

pub async fn get_couples(State(state): State<AppState>) -> Result<Json<Vec<Couple>>, AppError> {
    let mut couples = state.store().couples().await?;
    couples.sort_by_key(|c| c.id);
    Ok(Json(couples))
}

/// Vote for a couple
pub async fn vote(
    State(state): State<AppState>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let couple_id = request
        .couple_id
        .ok_or_else(|| AppError::BadRequest("coupleId is required".to_string()))?;

    let couple = state
        .store()
        .increment_votes(couple_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Couple {couple_id} not found")))?;

    info!(couple_id, votes = couple.votes, "Vote recorded");
    Ok(Json(VoteResponse {
        success: true,
        couple: Some(couple),
    }))
}

pub async fn results_status(
    State(state): State<AppState>,
) -> Result<Json<ResultsStatus>, AppError> {
    let results_visible = state.store().results_visible().await?;
    Ok(Json(ResultsStatus { results_visible }))
}

/// Zero every tally and advance the reset timestamp (admin only)
pub async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetResponse>, AppError> {
    authorize(&state, &headers)?;

    let last_reset = state.store().reset_votes().await?;
    info!(last_reset, "Votes reset");
    Ok(Json(ResetResponse {
        success: true,
        last_reset,
    }))
}

/// Show or hide results (admin only)
pub async fn toggle_results(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResultsStatus>, AppError> {
    authorize(&state, &headers)?;

    let results_visible = state.store().toggle_results().await?;
    info!(results_visible, "Results visibility toggled");
    Ok(Json(ResultsStatus { results_visible }))
}

/// Edit names and images (admin only). Votes are never touched.
pub async fn update_couples(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Vec<CoupleUpdate>>, JsonRejection>,
) -> Result<Json<CouplesResponse>, AppError> {
    authorize(&state, &headers)?;
    let Json(updates) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    if let Some(blank) = updates.iter().find(|u| u.name.trim().is_empty()) {
        return Err(AppError::BadRequest(format!(
            "Couple {} needs a name",
            blank.id
        )));
    }

    let mut couples = state.store().update_metadata(&updates).await?;
    couples.sort_by_key(|c| c.id);
    info!(updated = updates.len(), "Couples updated");
    Ok(Json(CouplesResponse {
        success: true,
        couples,
    }))
}
