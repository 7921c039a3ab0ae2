use crate::error::AppError;
use crate::middleware::User;
use crate::models::EnergyLevel;
use crate::services::state_events::{apply_state_update, StateUpdate};
use crate::state::AppState;
use actix_web::{put, web, HttpResponse};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub identity: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_not_disturb_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_level: Option<EnergyLevel>,
}

/// Toggle do-not-disturb and/or set the caller's energy level
/// PUT /api/v1/state
#[put("/api/v1/state")]
pub async fn update_state(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<StateUpdate>,
) -> Result<HttpResponse, AppError> {
    let applied = apply_state_update(
        state.deps.availability.as_ref(),
        &state.scheduler,
        &state.state_events,
        state.clock.as_ref(),
        user.id,
        body.into_inner(),
    )
    .await?;

    tracing::info!(
        user_id = %user.id,
        do_not_disturb_active = ?applied.do_not_disturb_active,
        energy_level = ?applied.energy_level,
        "identity state updated"
    );

    Ok(HttpResponse::Ok().json(StateResponse {
        identity: user.id,
        do_not_disturb_active: applied.do_not_disturb_active,
        energy_level: applied.energy_level,
    }))
}
