// libs/scheduling-cell/src/services/scheduler.rs
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    AppointmentRequest, BookingConfirmation, BookingRequest, ClinicSnapshot, EntityKind, RankingPolicy,
    SchedulingError, SlotSearchOutcome,
};
use crate::services::advisor::RankingAdvisor;
use crate::services::availability::AvailabilityCompiler;
use crate::services::booking::BookingTransactor;
use crate::services::ranking::RankingEngine;
use crate::services::slots::SlotGenerator;
use crate::services::store::SchedulingStore;

/// Entry point for slot search and booking.
pub struct SchedulingService {
    store: Arc<dyn SchedulingStore>,
    compiler: AvailabilityCompiler,
    ranking: RankingEngine,
    transactor: BookingTransactor,
    policy: RankingPolicy,
    default_granularity: Option<i64>,
    max_suggestions: usize,
}

impl SchedulingService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn SchedulingStore>,
        advisor: Option<Arc<dyn RankingAdvisor>>,
    ) -> Self {
        Self {
            compiler: AvailabilityCompiler::new(),
            ranking: RankingEngine::from_config(config, advisor),
            transactor: BookingTransactor::new(Arc::clone(&store), config),
            store,
            policy: RankingPolicy::default(),
            default_granularity: config.slot_granularity_minutes,
            max_suggestions: config.max_suggestions,
        }
    }

    /// Read-only: nothing is persisted, so dropping the future leaves no trace.
    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id, urgency = %request.urgency))]
    pub async fn find_slots(&self, request: &AppointmentRequest) -> Result<SlotSearchOutcome, SchedulingError> {
        let window = request.window()?;
        validate(request)?;
        if window.padded(self.policy.load_padding_hours).is_none() {
            return Err(SchedulingError::InvalidWindow(format!(
                "window {} is outside the supported date range",
                window
            )));
        }

        let snapshot = self
            .store
            .load_snapshot(request.clinic_id, window, self.policy.load_padding_hours)
            .await?;

        let doctor_ids = select_doctors(&snapshot, request)?;
        let room_ids = select_rooms(&snapshot, request)?;
        debug!("Searching {} doctors x {} rooms over {}", doctor_ids.len(), room_ids.len(), window);

        let compiled = self.compiler.compile(&snapshot, &doctor_ids, &room_ids, window)?;
        let generator = SlotGenerator::with_granularity(request.granularity_minutes.or(self.default_granularity));
        let candidates = generator.generate(request.duration(), &compiled.doctors, &compiled.rooms, window);

        if candidates.is_empty() {
            info!("No feasible slot in {}", window);
            return Ok(SlotSearchOutcome::NoFeasibleSlot);
        }

        let (ranking_source, mut ranked) = self.ranking.rank(&candidates, request, window, &snapshot).await;

        let limit = request.limit.unwrap_or(self.max_suggestions);
        if limit > 0 {
            ranked.truncate(limit);
        }

        info!("Offering {} candidates ({:?} ranking)", ranked.len(), ranking_source);
        Ok(SlotSearchOutcome::CandidatesReady {
            ranking_source,
            candidates: ranked,
        })
    }

    pub async fn book(&self, request: &BookingRequest) -> Result<BookingConfirmation, SchedulingError> {
        self.transactor.book(request).await
    }
}

fn validate(request: &AppointmentRequest) -> Result<(), SchedulingError> {
    if request.duration_minutes <= 0 {
        return Err(SchedulingError::InvalidRequest(format!(
            "duration_minutes must be positive, got {}",
            request.duration_minutes
        )));
    }
    if let Some(granularity) = request.granularity_minutes {
        if granularity <= 0 {
            return Err(SchedulingError::InvalidRequest(format!(
                "granularity_minutes must be positive, got {}",
                granularity
            )));
        }
    }
    Ok(())
}

/// Requested doctors, or every doctor matching the filters. Explicit ids must
/// belong to the clinic.
fn select_doctors(snapshot: &ClinicSnapshot, request: &AppointmentRequest) -> Result<Vec<Uuid>, SchedulingError> {
    let pool: Vec<_> = match &request.doctor_ids {
        Some(ids) => ids
            .iter()
            .map(|id| {
                snapshot.doctor(*id).ok_or(SchedulingError::UnknownResource {
                    kind: EntityKind::Doctor,
                    id: *id,
                })
            })
            .collect::<Result<_, _>>()?,
        None => snapshot.doctors.iter().collect(),
    };

    Ok(pool
        .into_iter()
        .filter(|doctor| doctor.is_active)
        .filter(|doctor| match &request.required_specialty {
            Some(wanted) => doctor
                .specialty
                .as_deref()
                .is_some_and(|specialty| specialty.trim().eq_ignore_ascii_case(wanted.trim())),
            None => true,
        })
        .map(|doctor| doctor.id)
        .collect())
}

fn select_rooms(snapshot: &ClinicSnapshot, request: &AppointmentRequest) -> Result<Vec<Uuid>, SchedulingError> {
    let pool: Vec<_> = match &request.room_ids {
        Some(ids) => ids
            .iter()
            .map(|id| {
                snapshot.room(*id).ok_or(SchedulingError::UnknownResource {
                    kind: EntityKind::Room,
                    id: *id,
                })
            })
            .collect::<Result<_, _>>()?,
        None => snapshot.rooms.iter().collect(),
    };

    Ok(pool
        .into_iter()
        .filter(|room| room.is_active)
        .filter(|room| match &request.required_room_type {
            Some(wanted) => room
                .room_type
                .as_deref()
                .is_some_and(|room_type| room_type.trim().eq_ignore_ascii_case(wanted.trim())),
            None => true,
        })
        .filter(|room| {
            request.required_equipment.iter().all(|needed| {
                room.equipment
                    .iter()
                    .any(|have| have.trim().eq_ignore_ascii_case(needed.trim()))
            })
        })
        .map(|room| room.id)
        .collect())
}
