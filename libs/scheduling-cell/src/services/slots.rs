// libs/scheduling-cell/src/services/slots.rs
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::debug;

use crate::models::{CandidateSlot, TimeRange};
use crate::services::availability::ResourceAvailability;

/// Pairs doctor and room free time into bookable slots of a fixed length.
#[derive(Debug, Clone, Default)]
pub struct SlotGenerator {
    granularity: Option<Duration>,
}

impl SlotGenerator {
    /// Anchors only at the start of each shared free interval.
    pub fn new() -> Self {
        Self { granularity: None }
    }

    /// Also anchors every `minutes` across each shared interval.
    pub fn with_granularity(minutes: Option<i64>) -> Self {
        Self {
            granularity: minutes.filter(|m| *m > 0).and_then(Duration::try_minutes),
        }
    }

    /// Candidates ordered by (start, doctor id, room id), unique per
    /// (doctor, room, start). Every slot lies inside `window`.
    pub fn generate(
        &self,
        duration: Duration,
        doctors: &[ResourceAvailability],
        rooms: &[ResourceAvailability],
        window: TimeRange,
    ) -> Vec<CandidateSlot> {
        if duration <= Duration::zero() {
            return Vec::new();
        }

        // Keyed by (start, doctor, room) so iteration order is the output order.
        let mut slots = BTreeSet::new();

        for doctor in doctors {
            for room in rooms {
                for doctor_free in &doctor.free {
                    for room_free in room.free.iter().filter(|r| r.overlaps(doctor_free)) {
                        let Some(shared) = doctor_free
                            .intersect(room_free)
                            .and_then(|shared| shared.intersect(&window))
                        else {
                            continue;
                        };

                        for start in self.anchors(shared, duration) {
                            slots.insert((start, doctor.resource.id, room.resource.id));
                        }
                    }
                }
            }
        }

        let candidates: Vec<CandidateSlot> = slots
            .into_iter()
            .map(|(start, doctor_id, room_id)| CandidateSlot {
                doctor_id,
                room_id,
                start_time: start,
                end_time: start + duration,
            })
            .collect();

        debug!("Generated {} candidate slots", candidates.len());
        candidates
    }

    fn anchors(&self, shared: TimeRange, duration: Duration) -> Vec<DateTime<Utc>> {
        if shared.duration() < duration {
            return Vec::new();
        }

        let mut anchors = vec![shared.start];
        if let Some(step) = self.granularity {
            let mut next = shared.start.checked_add_signed(step);
            while let Some(anchor) = next {
                match anchor.checked_add_signed(duration) {
                    Some(end) if end <= shared.end => anchors.push(anchor),
                    _ => break,
                }
                next = anchor.checked_add_signed(step);
            }
        }
        anchors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceRef;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, 0).unwrap()
    }

    fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    fn availability(resource: ResourceRef, free: Vec<TimeRange>) -> ResourceAvailability {
        ResourceAvailability { resource, busy: vec![], free }
    }

    #[test]
    fn anchors_at_intersection_start() {
        let doctor = availability(ResourceRef::doctor(Uuid::from_u128(1)), vec![range(at(9, 0), at(12, 0))]);
        let room = availability(ResourceRef::room(Uuid::from_u128(2)), vec![range(at(10, 0), at(17, 0))]);

        let slots = SlotGenerator::new().generate(
            Duration::minutes(30),
            &[doctor],
            &[room],
            range(at(0, 0), at(23, 0)),
        );
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_time, at(10, 0));
        assert_eq!(slots[0].end_time, at(10, 30));
    }

    #[test]
    fn short_intersections_are_skipped() {
        let doctor = availability(ResourceRef::doctor(Uuid::from_u128(1)), vec![range(at(9, 0), at(9, 20))]);
        let room = availability(ResourceRef::room(Uuid::from_u128(2)), vec![range(at(9, 0), at(17, 0))]);
        let slots = SlotGenerator::new().generate(Duration::minutes(30), &[doctor], &[room], range(at(0, 0), at(23, 0)));
        assert!(slots.is_empty());
    }

    #[test]
    fn granularity_adds_dense_anchors() {
        let doctor = availability(ResourceRef::doctor(Uuid::from_u128(1)), vec![range(at(9, 0), at(10, 0))]);
        let room = availability(ResourceRef::room(Uuid::from_u128(2)), vec![range(at(9, 0), at(10, 0))]);
        let slots = SlotGenerator::with_granularity(Some(15)).generate(
            Duration::minutes(30),
            &[doctor],
            &[room],
            range(at(0, 0), at(23, 0)),
        );
        let starts: Vec<_> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![at(9, 0), at(9, 15), at(9, 30)]);
    }

    #[test]
    fn unrepresentable_step_falls_back_to_interval_start() {
        let doctor = availability(ResourceRef::doctor(Uuid::from_u128(1)), vec![range(at(9, 0), at(12, 0))]);
        let room = availability(ResourceRef::room(Uuid::from_u128(2)), vec![range(at(9, 0), at(12, 0))]);

        for minutes in [1_000_000_000_000, i64::MAX] {
            let slots = SlotGenerator::with_granularity(Some(minutes)).generate(
                Duration::minutes(30),
                std::slice::from_ref(&doctor),
                std::slice::from_ref(&room),
                range(at(0, 0), at(23, 0)),
            );
            let starts: Vec<_> = slots.iter().map(|s| s.start_time).collect();
            assert_eq!(starts, vec![at(9, 0)]);
        }
    }

    #[test]
    fn output_is_ordered_by_start_then_ids() {
        let late_doctor = availability(ResourceRef::doctor(Uuid::from_u128(5)), vec![range(at(9, 0), at(10, 0))]);
        let early_doctor = availability(ResourceRef::doctor(Uuid::from_u128(3)), vec![range(at(9, 0), at(10, 0))]);
        let room = availability(ResourceRef::room(Uuid::from_u128(2)), vec![range(at(8, 0), at(10, 0))]);
        let later = availability(ResourceRef::doctor(Uuid::from_u128(1)), vec![range(at(9, 30), at(10, 0))]);

        let slots = SlotGenerator::new().generate(
            Duration::minutes(30),
            &[late_doctor, early_doctor, later],
            &[room],
            range(at(0, 0), at(23, 0)),
        );
        let order: Vec<_> = slots.iter().map(|s| (s.start_time, s.doctor_id)).collect();
        assert_eq!(
            order,
            vec![
                (at(9, 0), Uuid::from_u128(3)),
                (at(9, 0), Uuid::from_u128(5)),
                (at(9, 30), Uuid::from_u128(1)),
            ]
        );
    }
}
