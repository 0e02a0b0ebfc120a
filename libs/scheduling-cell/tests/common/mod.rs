// libs/scheduling-cell/tests/common/mod.rs
#![allow(dead_code)]

use chrono::{DateTime, NaiveTime, TimeZone, Utc, Weekday};
use std::sync::Arc;
use uuid::Uuid;

use scheduling_cell::models::{
    AppointmentRequest, BlackoutConstraint, BookingRequest, Doctor, OperatingWindow, Owner, Pet,
    RankedCandidate, Room, SlotSelection,
};
use scheduling_cell::services::advisor::RankingAdvisor;
use scheduling_cell::services::memory::InMemorySchedulingStore;
use scheduling_cell::services::store::SchedulingStore;
use scheduling_cell::SchedulingService;
use shared_config::AppConfig;

pub const CLINIC: Uuid = Uuid::from_u128(0xC1);
pub const OTHER_CLINIC: Uuid = Uuid::from_u128(0xC2);
pub const DOCTOR: Uuid = Uuid::from_u128(0xD1);
pub const SECOND_DOCTOR: Uuid = Uuid::from_u128(0xD2);
pub const ROOM: Uuid = Uuid::from_u128(0xA1);
pub const PET: Uuid = Uuid::from_u128(0xB1);
pub const OWNER: Uuid = Uuid::from_u128(0xE1);
pub const FOREIGN_PET: Uuid = Uuid::from_u128(0xB2);
pub const FOREIGN_OWNER: Uuid = Uuid::from_u128(0xE2);

/// 2024-05-06 is a Monday.
pub fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, 0).unwrap()
}

pub fn config() -> AppConfig {
    AppConfig {
        booking_retry_backoff_ms: 1,
        advisor_timeout_ms: 200,
        ..AppConfig::default()
    }
}

/// One clinic open Monday 09:00-17:00 with two doctors and one exam room, plus
/// a pet and owner registered at a different clinic.
pub async fn seeded_store() -> Arc<InMemorySchedulingStore> {
    let store = Arc::new(InMemorySchedulingStore::new());

    store
        .add_operating_window(OperatingWindow {
            clinic_id: CLINIC,
            weekday: Weekday::Mon,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        })
        .await;

    for (id, name, specialty) in [(DOCTOR, "Dr. Vega", "General"), (SECOND_DOCTOR, "Dr. Ross", "Dentistry")] {
        store
            .add_doctor(Doctor {
                id,
                clinic_id: CLINIC,
                display_name: name.to_string(),
                specialty: Some(specialty.to_string()),
                is_active: true,
            })
            .await;
    }

    store
        .add_room(Room {
            id: ROOM,
            clinic_id: CLINIC,
            name: "Exam 1".to_string(),
            room_type: Some("exam".to_string()),
            equipment: vec!["scale".to_string()],
            is_active: true,
        })
        .await;

    store
        .add_owner(Owner { id: OWNER, clinic_id: CLINIC, full_name: Some("Ana Lima".to_string()) })
        .await;
    store
        .add_pet(Pet { id: PET, clinic_id: CLINIC, owner_id: Some(OWNER), name: "Biscuit".to_string() })
        .await;

    store
        .add_owner(Owner { id: FOREIGN_OWNER, clinic_id: OTHER_CLINIC, full_name: None })
        .await;
    store
        .add_pet(Pet {
            id: FOREIGN_PET,
            clinic_id: OTHER_CLINIC,
            owner_id: Some(FOREIGN_OWNER),
            name: "Rex".to_string(),
        })
        .await;

    store
}

pub fn blackout(doctor_id: Option<Uuid>, start: DateTime<Utc>, end: DateTime<Utc>) -> BlackoutConstraint {
    BlackoutConstraint {
        id: Uuid::new_v4(),
        clinic_id: CLINIC,
        doctor_id,
        room_id: None,
        title: "Unavailable".to_string(),
        start_time: start,
        end_time: end,
        recurrence: None,
        is_all_day: false,
    }
}

pub fn service(
    store: &Arc<InMemorySchedulingStore>,
    advisor: Option<Arc<dyn RankingAdvisor>>,
) -> SchedulingService {
    service_with_config(&config(), store, advisor)
}

pub fn service_with_config(
    config: &AppConfig,
    store: &Arc<InMemorySchedulingStore>,
    advisor: Option<Arc<dyn RankingAdvisor>>,
) -> SchedulingService {
    let store: Arc<dyn SchedulingStore> = store.clone();
    SchedulingService::new(config, store, advisor)
}

/// 30-minute visit, Monday morning.
pub fn search() -> AppointmentRequest {
    AppointmentRequest::new(CLINIC, 30, monday(8, 0), monday(12, 0)).with_reason("vaccination")
}

pub fn booking_for(candidate: &RankedCandidate) -> BookingRequest {
    BookingRequest {
        clinic_id: CLINIC,
        slot: SlotSelection::from(candidate),
        pet_id: PET,
        owner_id: OWNER,
        reason: Some("vaccination".to_string()),
        notes: None,
        booked_by: None,
    }
}
