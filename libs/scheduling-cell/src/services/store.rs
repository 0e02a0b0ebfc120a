// libs/scheduling-cell/src/services/store.rs
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Appointment, ClinicSnapshot, EntityRef, FeedbackEvent, NewBooking, SchedulingError, TimeRange,
};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Another booking already holds the doctor or room for an overlapping interval.
    #[error("Booking conflicts with an existing appointment")]
    Conflict,

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for SchedulingError {
    fn from(err: StoreError) -> Self {
        SchedulingError::Store(err.to_string())
    }
}

/// Read side used by slot search and the booking re-check.
#[async_trait]
pub trait ScheduleReader: Send + Sync {
    /// Resources, operating windows, blackouts, appointments overlapping
    /// `window` padded by `padding_hours`, and the clinic's feedback history.
    async fn load_snapshot(
        &self,
        clinic_id: Uuid,
        window: TimeRange,
        padding_hours: i64,
    ) -> Result<ClinicSnapshot, StoreError>;
}

#[async_trait]
pub trait OwnershipDirectory: Send + Sync {
    /// Clinic owning the entity, or `None` if it does not exist.
    async fn owning_clinic(&self, entity: EntityRef) -> Result<Option<Uuid>, StoreError>;
}

#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Inserts the appointment and its feedback event atomically, failing with
    /// `StoreError::Conflict` if either resource is already held.
    async fn insert_booking(&self, booking: NewBooking) -> Result<(Appointment, FeedbackEvent), StoreError>;
}

pub trait SchedulingStore: ScheduleReader + OwnershipDirectory + BookingLedger {}

impl<T> SchedulingStore for T where T: ScheduleReader + OwnershipDirectory + BookingLedger {}
