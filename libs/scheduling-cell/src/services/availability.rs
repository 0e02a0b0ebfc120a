// libs/scheduling-cell/src/services/availability.rs
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::{
    BlackoutConstraint, ClinicSnapshot, EntityKind, ResourceKind, ResourceRef, SchedulingError,
    TimeRange,
};
use crate::services::recurrence;

/// Busy and free intervals of one doctor or room inside a search window.
/// Both lists are sorted and non-overlapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAvailability {
    pub resource: ResourceRef,
    pub busy: Vec<TimeRange>,
    pub free: Vec<TimeRange>,
}

#[derive(Debug, Clone)]
pub struct CompiledAvailability {
    pub window: TimeRange,
    pub doctors: Vec<ResourceAvailability>,
    pub rooms: Vec<ResourceAvailability>,
}

impl CompiledAvailability {
    pub fn doctor(&self, id: Uuid) -> Option<&ResourceAvailability> {
        self.doctors.iter().find(|a| a.resource.id == id)
    }

    pub fn room(&self, id: Uuid) -> Option<&ResourceAvailability> {
        self.rooms.iter().find(|a| a.resource.id == id)
    }
}

/// Turns operating windows, blackouts and booked appointments into free time.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityCompiler;

impl AvailabilityCompiler {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, snapshot), fields(clinic_id = %snapshot.clinic_id))]
    pub fn compile(
        &self,
        snapshot: &ClinicSnapshot,
        doctor_ids: &[Uuid],
        room_ids: &[Uuid],
        window: TimeRange,
    ) -> Result<CompiledAvailability, SchedulingError> {
        let envelope = operating_envelope(snapshot, window);

        let doctors = doctor_ids
            .iter()
            .map(|id| self.compile_with_envelope(snapshot, ResourceRef::doctor(*id), window, &envelope))
            .collect::<Result<Vec<_>, _>>()?;
        let rooms = room_ids
            .iter()
            .map(|id| self.compile_with_envelope(snapshot, ResourceRef::room(*id), window, &envelope))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Compiled availability for {} doctors and {} rooms over {}",
            doctors.len(),
            rooms.len(),
            window
        );

        Ok(CompiledAvailability { window, doctors, rooms })
    }

    pub fn compile_resource(
        &self,
        snapshot: &ClinicSnapshot,
        resource: ResourceRef,
        window: TimeRange,
    ) -> Result<ResourceAvailability, SchedulingError> {
        let envelope = operating_envelope(snapshot, window);
        self.compile_with_envelope(snapshot, resource, window, &envelope)
    }

    /// True when both the doctor and the room are free for the whole range.
    pub fn is_free(
        &self,
        snapshot: &ClinicSnapshot,
        doctor_id: Uuid,
        room_id: Uuid,
        range: TimeRange,
    ) -> Result<bool, SchedulingError> {
        let compiled = self.compile(snapshot, &[doctor_id], &[room_id], range)?;
        let covered = |availability: Option<&ResourceAvailability>| {
            availability.is_some_and(|a| a.free.iter().any(|free| free.contains(&range)))
        };
        Ok(covered(compiled.doctor(doctor_id)) && covered(compiled.room(room_id)))
    }

    fn compile_with_envelope(
        &self,
        snapshot: &ClinicSnapshot,
        resource: ResourceRef,
        window: TimeRange,
        envelope: &[TimeRange],
    ) -> Result<ResourceAvailability, SchedulingError> {
        let is_active = snapshot.is_active(resource).ok_or(SchedulingError::UnknownResource {
            kind: match resource.kind {
                ResourceKind::Doctor => EntityKind::Doctor,
                ResourceKind::Room => EntityKind::Room,
            },
            id: resource.id,
        })?;

        let mut busy: Vec<TimeRange> = snapshot
            .blackouts
            .iter()
            .filter(|blackout| blackout.applies_to(resource))
            .flat_map(|blackout| blackout_occurrences(blackout, window))
            .collect();

        busy.extend(
            snapshot
                .appointments
                .iter()
                .filter(|appointment| appointment.occupies(resource))
                .filter_map(|appointment| appointment.range()),
        );

        let busy: Vec<TimeRange> = merge_intervals(busy)
            .into_iter()
            .filter_map(|interval| interval.intersect(&window))
            .collect();

        let free = if is_active {
            subtract(envelope, &busy)
        } else {
            Vec::new()
        };

        Ok(ResourceAvailability { resource, busy, free })
    }
}

/// Clinic operating hours inside the window. No configured windows means the
/// clinic places no restriction of its own.
pub fn operating_envelope(snapshot: &ClinicSnapshot, window: TimeRange) -> Vec<TimeRange> {
    if snapshot.operating_windows.is_empty() {
        return vec![window];
    }

    let first_day = window.start.date_naive().pred_opt().unwrap_or(window.start.date_naive());
    let last_day = window.end.date_naive();

    let mut intervals = Vec::new();
    for day in first_day.iter_days().take_while(|day| *day <= last_day) {
        for operating in snapshot
            .operating_windows
            .iter()
            .filter(|operating| operating.weekday == day.weekday())
        {
            let start = day.and_time(operating.start_time).and_utc();
            let end_day = if operating.end_time > operating.start_time {
                day
            } else {
                let Some(next) = day.succ_opt() else {
                    continue;
                };
                next
            };
            let end = end_day.and_time(operating.end_time).and_utc();

            if let Some(clipped) = TimeRange::new(start, end).and_then(|r| r.intersect(&window)) {
                intervals.push(clipped);
            }
        }
    }

    merge_intervals(intervals)
}

fn blackout_occurrences(blackout: &BlackoutConstraint, window: TimeRange) -> Vec<TimeRange> {
    let Some(seed) = TimeRange::new(blackout.start_time, blackout.end_time) else {
        return Vec::new();
    };
    let seed = if blackout.is_all_day { widen_to_days(seed) } else { seed };
    recurrence::expand_optional(blackout.recurrence.as_ref(), seed, window)
}

/// Stretches a range to whole UTC days; an end exactly at midnight stays put.
fn widen_to_days(range: TimeRange) -> TimeRange {
    let start = midnight(range.start.date_naive());
    let end_date = range.end.date_naive();
    let end = if midnight(end_date) == range.end {
        range.end
    } else {
        end_date.succ_opt().map(midnight).unwrap_or(range.end)
    };
    TimeRange { start, end }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Sorts and merges intervals that overlap or touch.
pub fn merge_intervals(mut intervals: Vec<TimeRange>) -> Vec<TimeRange> {
    intervals.sort();
    let mut merged: Vec<TimeRange> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(current) if interval.start <= current.end => {
                current.end = current.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// `base − busy`; both inputs sorted and merged.
pub fn subtract(base: &[TimeRange], busy: &[TimeRange]) -> Vec<TimeRange> {
    let mut free = Vec::new();
    for interval in base {
        let mut cursor = interval.start;
        for blocked in busy.iter().filter(|blocked| blocked.overlaps(interval)) {
            if blocked.start > cursor {
                free.push(TimeRange { start: cursor, end: blocked.start });
            }
            cursor = cursor.max(blocked.end);
        }
        if let Some(rest) = TimeRange::new(cursor, interval.end) {
            free.push(rest);
        }
    }
    free
}
