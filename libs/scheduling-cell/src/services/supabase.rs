// libs/scheduling-cell/src/services/supabase.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc, Weekday};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{
    Appointment, BlackoutConstraint, ClinicSnapshot, Doctor, EntityKind, EntityRef,
    FeedbackEvent, NewBooking, OperatingWindow, RecurrenceRule, Room, TimeRange,
};
use crate::services::store::{BookingLedger, OwnershipDirectory, ScheduleReader, StoreError};

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        if err.is_conflict() {
            StoreError::Conflict
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct OperatingWindowRow {
    clinic_id: Uuid,
    /// 0 = Monday.
    weekday: u8,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

#[derive(Debug, Deserialize)]
struct BlackoutRow {
    id: Uuid,
    clinic_id: Uuid,
    doctor_id: Option<Uuid>,
    room_id: Option<Uuid>,
    title: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    recurrence: Option<String>,
    #[serde(default)]
    is_all_day: bool,
}

#[derive(Debug, Deserialize)]
struct ClinicRow {
    clinic_id: Uuid,
}

/// PostgREST-backed store. Bookings go through the `book_appointment`
/// function, which inserts both rows in one transaction and relies on the
/// appointments exclusion constraints; PostgREST reports a violation as 409.
pub struct SupabaseSchedulingStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSchedulingStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select<T: DeserializeOwned>(&self, path: String) -> Result<Vec<T>, StoreError> {
        Ok(self.supabase.request(Method::GET, &path, None, None).await?)
    }

    async fn operating_windows(&self, clinic_id: Uuid) -> Result<Vec<OperatingWindow>, StoreError> {
        let rows: Vec<OperatingWindowRow> = self
            .select(format!("/rest/v1/operating_windows?clinic_id=eq.{}&select=*", clinic_id))
            .await?;

        rows.into_iter()
            .map(|row| {
                let weekday = Weekday::try_from(row.weekday).map_err(|_| {
                    StoreError::Backend(format!("operating window weekday {} out of range", row.weekday))
                })?;
                Ok(OperatingWindow {
                    clinic_id: row.clinic_id,
                    weekday,
                    start_time: row.start_time,
                    end_time: row.end_time,
                })
            })
            .collect()
    }

    async fn blackouts(&self, clinic_id: Uuid) -> Result<Vec<BlackoutConstraint>, StoreError> {
        let rows: Vec<BlackoutRow> = self
            .select(format!("/rest/v1/blackout_constraints?clinic_id=eq.{}&select=*", clinic_id))
            .await?;

        rows.into_iter()
            .map(|row| {
                let recurrence = row
                    .recurrence
                    .as_deref()
                    .filter(|raw| !raw.trim().is_empty())
                    .map(str::parse::<RecurrenceRule>)
                    .transpose()
                    .map_err(|e| {
                        warn!("Blackout {} has an unreadable recurrence: {}", row.id, e);
                        StoreError::Backend(format!("blackout {}: {}", row.id, e))
                    })?;
                Ok(BlackoutConstraint {
                    id: row.id,
                    clinic_id: row.clinic_id,
                    doctor_id: row.doctor_id,
                    room_id: row.room_id,
                    title: row.title,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    recurrence,
                    is_all_day: row.is_all_day,
                })
            })
            .collect()
    }
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ScheduleReader for SupabaseSchedulingStore {
    #[instrument(skip(self))]
    async fn load_snapshot(
        &self,
        clinic_id: Uuid,
        window: TimeRange,
        padding_hours: i64,
    ) -> Result<ClinicSnapshot, StoreError> {
        let padded = window.padded(padding_hours).unwrap_or(window);
        let from = timestamp(padded.start);
        let to = timestamp(padded.end);

        let (doctors, rooms, operating_windows, blackouts, appointments, feedback) = futures::try_join!(
            self.select::<Doctor>(format!("/rest/v1/doctors?clinic_id=eq.{}&select=*", clinic_id)),
            self.select::<Room>(format!("/rest/v1/rooms?clinic_id=eq.{}&select=*", clinic_id)),
            self.operating_windows(clinic_id),
            self.blackouts(clinic_id),
            self.select::<Appointment>(format!(
                "/rest/v1/appointments?clinic_id=eq.{}&status=eq.scheduled&start_time=lt.{}&end_time=gt.{}&select=*",
                clinic_id, to, from
            )),
            self.select::<FeedbackEvent>(format!(
                "/rest/v1/feedback_events?clinic_id=eq.{}&select=*&order=created_at.desc",
                clinic_id
            )),
        )?;

        debug!(
            "Loaded snapshot for clinic {}: {} doctors, {} rooms, {} appointments",
            clinic_id,
            doctors.len(),
            rooms.len(),
            appointments.len()
        );

        Ok(ClinicSnapshot {
            clinic_id,
            doctors,
            rooms,
            operating_windows,
            blackouts,
            appointments,
            feedback,
        })
    }
}

#[async_trait]
impl OwnershipDirectory for SupabaseSchedulingStore {
    async fn owning_clinic(&self, entity: EntityRef) -> Result<Option<Uuid>, StoreError> {
        let table = match entity.kind {
            EntityKind::Pet => "pets",
            EntityKind::Owner => "owners",
            EntityKind::Doctor => "doctors",
            EntityKind::Room => "rooms",
        };
        let rows: Vec<ClinicRow> = self
            .select(format!("/rest/v1/{}?id=eq.{}&select=clinic_id", table, entity.id))
            .await?;
        Ok(rows.first().map(|row| row.clinic_id))
    }
}

#[async_trait]
impl BookingLedger for SupabaseSchedulingStore {
    #[instrument(skip(self, booking), fields(appointment_id = %booking.appointment.id))]
    async fn insert_booking(&self, booking: NewBooking) -> Result<(Appointment, FeedbackEvent), StoreError> {
        let args = json!({
            "appointment": booking.appointment,
            "feedback": booking.feedback
        });

        let _: Value = self.supabase.rpc("book_appointment", args).await?;
        debug!("book_appointment committed appointment {}", booking.appointment.id);

        Ok((booking.appointment, booking.feedback))
    }
}
