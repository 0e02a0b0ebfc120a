// libs/scheduling-cell/src/services/memory.rs
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentStatus, BlackoutConstraint, ClinicSnapshot, Doctor, EntityKind,
    EntityRef, FeedbackEvent, NewBooking, OperatingWindow, Owner, Pet, ResourceRef, Room,
    TimeRange,
};
use crate::services::store::{BookingLedger, OwnershipDirectory, ScheduleReader, StoreError};

#[derive(Debug, Default)]
struct Tables {
    doctors: Vec<Doctor>,
    rooms: Vec<Room>,
    pets: Vec<Pet>,
    owners: Vec<Owner>,
    operating_windows: Vec<OperatingWindow>,
    blackouts: Vec<BlackoutConstraint>,
    appointments: Vec<Appointment>,
    feedback: Vec<FeedbackEvent>,
}

/// Doctor or room time held by a booking between its conflict check and its commit.
#[derive(Debug, Clone, Copy)]
struct Claim {
    booking: Uuid,
    resource: ResourceRef,
    range: TimeRange,
}

/// Releases a booking's claims when the insert finishes, however it finishes.
struct ClaimGuard<'a> {
    store: &'a InMemorySchedulingStore,
    booking: Uuid,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.store.claims().retain(|claim| claim.booking != self.booking);
        self.store.released.notify_waiters();
    }
}

/// Process-local store. A booking only waits for another booking that claims
/// the same doctor or room over an overlapping interval; searches only take
/// the shared read lock.
#[derive(Default)]
pub struct InMemorySchedulingStore {
    tables: RwLock<Tables>,
    claims: Mutex<Vec<Claim>>,
    released: Notify,
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_doctor(&self, doctor: Doctor) {
        self.tables.write().await.doctors.push(doctor);
    }

    pub async fn add_room(&self, room: Room) {
        self.tables.write().await.rooms.push(room);
    }

    pub async fn add_pet(&self, pet: Pet) {
        self.tables.write().await.pets.push(pet);
    }

    pub async fn add_owner(&self, owner: Owner) {
        self.tables.write().await.owners.push(owner);
    }

    pub async fn add_operating_window(&self, window: OperatingWindow) {
        self.tables.write().await.operating_windows.push(window);
    }

    pub async fn add_blackout(&self, blackout: BlackoutConstraint) {
        self.tables.write().await.blackouts.push(blackout);
    }

    /// Seeds an existing appointment without the booking checks.
    pub async fn add_appointment(&self, appointment: Appointment) {
        self.tables.write().await.appointments.push(appointment);
    }

    pub async fn add_feedback(&self, event: FeedbackEvent) {
        self.tables.write().await.feedback.push(event);
    }

    pub async fn appointments(&self, clinic_id: Uuid) -> Vec<Appointment> {
        self.tables
            .read()
            .await
            .appointments
            .iter()
            .filter(|a| a.clinic_id == clinic_id)
            .cloned()
            .collect()
    }

    pub async fn feedback_events(&self, clinic_id: Uuid) -> Vec<FeedbackEvent> {
        self.tables
            .read()
            .await
            .feedback
            .iter()
            .filter(|e| e.clinic_id == clinic_id)
            .cloned()
            .collect()
    }

    fn claims(&self) -> MutexGuard<'_, Vec<Claim>> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until no in-flight booking holds any of `resources` over an
    /// interval overlapping `range`, then claims them.
    async fn claim(&self, resources: [ResourceRef; 2], range: TimeRange) -> ClaimGuard<'_> {
        let booking = Uuid::new_v4();
        loop {
            let released = self.released.notified();
            {
                let mut claims = self.claims();
                let contended = claims
                    .iter()
                    .any(|claim| resources.contains(&claim.resource) && claim.range.overlaps(&range));
                if !contended {
                    claims.extend(resources.iter().map(|&resource| Claim { booking, resource, range }));
                    return ClaimGuard { store: self, booking };
                }
            }
            debug!("Waiting on an overlapping booking for {}", range);
            released.await;
        }
    }
}

#[async_trait]
impl ScheduleReader for InMemorySchedulingStore {
    async fn load_snapshot(
        &self,
        clinic_id: Uuid,
        window: TimeRange,
        padding_hours: i64,
    ) -> Result<ClinicSnapshot, StoreError> {
        let padded = window.padded(padding_hours).unwrap_or(window);
        let tables = self.tables.read().await;

        Ok(ClinicSnapshot {
            clinic_id,
            doctors: tables.doctors.iter().filter(|d| d.clinic_id == clinic_id).cloned().collect(),
            rooms: tables.rooms.iter().filter(|r| r.clinic_id == clinic_id).cloned().collect(),
            operating_windows: tables
                .operating_windows
                .iter()
                .filter(|w| w.clinic_id == clinic_id)
                .cloned()
                .collect(),
            blackouts: tables.blackouts.iter().filter(|b| b.clinic_id == clinic_id).cloned().collect(),
            appointments: tables
                .appointments
                .iter()
                .filter(|a| a.clinic_id == clinic_id && a.status == AppointmentStatus::Scheduled)
                .filter(|a| a.range().is_some_and(|r| r.overlaps(&padded)))
                .cloned()
                .collect(),
            feedback: tables.feedback.iter().filter(|e| e.clinic_id == clinic_id).cloned().collect(),
        })
    }
}

#[async_trait]
impl OwnershipDirectory for InMemorySchedulingStore {
    async fn owning_clinic(&self, entity: EntityRef) -> Result<Option<Uuid>, StoreError> {
        let tables = self.tables.read().await;
        let clinic = match entity.kind {
            EntityKind::Pet => tables.pets.iter().find(|p| p.id == entity.id).map(|p| p.clinic_id),
            EntityKind::Owner => tables.owners.iter().find(|o| o.id == entity.id).map(|o| o.clinic_id),
            EntityKind::Doctor => tables.doctors.iter().find(|d| d.id == entity.id).map(|d| d.clinic_id),
            EntityKind::Room => tables.rooms.iter().find(|r| r.id == entity.id).map(|r| r.clinic_id),
        };
        Ok(clinic)
    }
}

#[async_trait]
impl BookingLedger for InMemorySchedulingStore {
    async fn insert_booking(&self, booking: NewBooking) -> Result<(Appointment, FeedbackEvent), StoreError> {
        let NewBooking { appointment, feedback } = booking;
        let range = appointment
            .range()
            .ok_or_else(|| StoreError::Backend(format!("appointment {} has an empty interval", appointment.id)))?;
        let claim = self
            .claim(
                [ResourceRef::doctor(appointment.doctor_id), ResourceRef::room(appointment.room_id)],
                range,
            )
            .await;

        // Any competing booking for an overlapping doctor or room interval waits on the claim above.
        let conflicting = self
            .tables
            .read()
            .await
            .appointments
            .iter()
            .any(|existing| existing.conflicts_with(&appointment));
        if conflicting {
            warn!(
                "Rejected overlapping booking for doctor {} / room {} at {}",
                appointment.doctor_id, appointment.room_id, appointment.start_time
            );
            return Err(StoreError::Conflict);
        }

        {
            let mut tables = self.tables.write().await;
            tables.appointments.push(appointment.clone());
            tables.feedback.push(feedback.clone());
        }
        drop(claim);

        debug!("Stored appointment {} with feedback event {}", appointment.id, feedback.id);
        Ok((appointment, feedback))
    }
}
