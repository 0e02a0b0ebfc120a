// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::Value;
use tracing::debug;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{AppointmentRequest, BookingRequest, SchedulingError};
use crate::services::advisor::RankingAdvisor;
use crate::services::scheduler::SchedulingService;
use crate::services::store::SchedulingStore;

/// Shared by every scheduling route; the store behind it outlives requests.
pub struct SchedulingState {
    pub service: SchedulingService,
}

impl SchedulingState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn SchedulingStore>,
        advisor: Option<Arc<dyn RankingAdvisor>>,
    ) -> Self {
        Self {
            service: SchedulingService::new(config, store, advisor),
        }
    }
}

// ==============================================================================
// SLOT SEARCH
// ==============================================================================

#[axum::debug_handler]
pub async fn find_slots(
    State(state): State<Arc<SchedulingState>>,
    Json(request): Json<AppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    debug!("find-slots for clinic {}", request.clinic_id);

    let outcome = state
        .service
        .find_slots(&request)
        .await
        .map_err(scheduling_error)?;

    let body = serde_json::to_value(&outcome).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(body))
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<SchedulingState>>,
    Json(request): Json<BookingRequest>,
) -> Result<Json<Value>, AppError> {
    let confirmation = state
        .service
        .book(&request)
        .await
        .map_err(scheduling_error)?;

    let body = serde_json::to_value(&confirmation).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(body))
}

fn scheduling_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::InvalidWindow(msg) | SchedulingError::InvalidRequest(msg) => {
            AppError::BadRequest(msg)
        }
        SchedulingError::UnknownResource { .. } => AppError::NotFound(e.to_string()),
        SchedulingError::CrossTenantReference { .. } => AppError::Forbidden(e.to_string()),
        SchedulingError::SlotConflict { .. } => AppError::Conflict(e.to_string()),
        SchedulingError::Store(msg) => AppError::Database(msg),
        SchedulingError::InvalidTransition { .. } => AppError::Internal(e.to_string()),
    }
}
