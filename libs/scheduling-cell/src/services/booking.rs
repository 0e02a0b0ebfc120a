// libs/scheduling-cell/src/services/booking.rs
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    Appointment, AppointmentStatus, BookingConfirmation, BookingRequest, EntityKind, EntityRef,
    FeedbackEvent, NewBooking, RequestState, SchedulingError, TimeRange,
};
use crate::services::availability::AvailabilityCompiler;
use crate::services::store::{SchedulingStore, StoreError};

/// Turns a chosen candidate into a committed appointment plus feedback event.
pub struct BookingTransactor {
    store: Arc<dyn SchedulingStore>,
    compiler: AvailabilityCompiler,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl BookingTransactor {
    pub fn new(store: Arc<dyn SchedulingStore>, config: &AppConfig) -> Self {
        Self {
            store,
            compiler: AvailabilityCompiler::new(),
            max_attempts: config.booking_max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.booking_retry_backoff_ms),
        }
    }

    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id, doctor_id = %request.slot.doctor_id, room_id = %request.slot.room_id))]
    pub async fn book(&self, request: &BookingRequest) -> Result<BookingConfirmation, SchedulingError> {
        let range = TimeRange::new(request.slot.start_time, request.slot.end_time).ok_or_else(|| {
            SchedulingError::InvalidWindow(format!(
                "slot start {} must be before slot end {}",
                request.slot.start_time.to_rfc3339(),
                request.slot.end_time.to_rfc3339()
            ))
        })?;

        self.verify_tenancy(request).await?;

        for attempt in 1..=self.max_attempts {
            debug!("Booking attempt {}/{} for {}", attempt, self.max_attempts, range);

            if !self.still_free(request, range).await? {
                warn!("Slot {} is no longer free", range);
                return Err(conflict(request));
            }

            match self.store.insert_booking(new_booking(request)).await {
                Ok((appointment, feedback)) => {
                    info!(
                        "Booked appointment {} for doctor {} in room {} at {}",
                        appointment.id, appointment.doctor_id, appointment.room_id, appointment.start_time
                    );
                    return Ok(BookingConfirmation {
                        state: RequestState::Booked,
                        appointment,
                        feedback_event_id: feedback.id,
                        attempts: attempt,
                    });
                }
                Err(StoreError::Conflict) if attempt < self.max_attempts => {
                    warn!(
                        "Booking conflict detected, retrying attempt {}/{}",
                        attempt, self.max_attempts
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(StoreError::Conflict) => break,
                Err(e) => return Err(e.into()),
            }
        }

        warn!("Booking gave up after {} attempts", self.max_attempts);
        Err(conflict(request))
    }

    /// Every referenced entity must exist and belong to the requesting clinic.
    async fn verify_tenancy(&self, request: &BookingRequest) -> Result<(), SchedulingError> {
        let references = [
            EntityRef { kind: EntityKind::Pet, id: request.pet_id },
            EntityRef { kind: EntityKind::Owner, id: request.owner_id },
            EntityRef { kind: EntityKind::Doctor, id: request.slot.doctor_id },
            EntityRef { kind: EntityKind::Room, id: request.slot.room_id },
        ];

        for entity in references {
            match self.store.owning_clinic(entity).await? {
                None => {
                    return Err(SchedulingError::UnknownResource { kind: entity.kind, id: entity.id });
                }
                Some(clinic_id) if clinic_id != request.clinic_id => {
                    warn!(
                        "Rejected cross-clinic {} {} (owned by {}) for clinic {}",
                        entity.kind, entity.id, clinic_id, request.clinic_id
                    );
                    return Err(SchedulingError::CrossTenantReference { kind: entity.kind, id: entity.id });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn still_free(&self, request: &BookingRequest, range: TimeRange) -> Result<bool, SchedulingError> {
        let snapshot = self.store.load_snapshot(request.clinic_id, range, 0).await?;
        self.compiler
            .is_free(&snapshot, request.slot.doctor_id, request.slot.room_id, range)
    }
}

fn conflict(request: &BookingRequest) -> SchedulingError {
    SchedulingError::SlotConflict {
        doctor_id: request.slot.doctor_id,
        room_id: request.slot.room_id,
    }
}

fn new_booking(request: &BookingRequest) -> NewBooking {
    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4(),
        clinic_id: request.clinic_id,
        pet_id: request.pet_id,
        owner_id: request.owner_id,
        doctor_id: request.slot.doctor_id,
        room_id: request.slot.room_id,
        start_time: request.slot.start_time,
        end_time: request.slot.end_time,
        status: AppointmentStatus::Scheduled,
        reason: request.reason.clone(),
        notes: request.notes.clone(),
        created_at: now,
    };
    let feedback = FeedbackEvent {
        id: Uuid::new_v4(),
        clinic_id: request.clinic_id,
        appointment_id: appointment.id,
        user_id: request.booked_by,
        suggestion_rank: request.slot.rank,
        suggestion_score: request.slot.score,
        suggestion_doctor_id: request.slot.doctor_id,
        suggestion_room_id: request.slot.room_id,
        suggestion_start_time: request.slot.start_time,
        suggestion_end_time: request.slot.end_time,
        reason: request.reason.clone(),
        rating: None,
        sentiment: None,
        created_at: now,
    };
    NewBooking { appointment, feedback }
}
