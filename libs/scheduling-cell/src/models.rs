// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// TIME PRIMITIVES
// ==============================================================================

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Returns `None` for empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        TimeRange::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// Widened by `hours` on both sides; `None` past the representable range.
    pub fn padded(&self, hours: i64) -> Option<TimeRange> {
        let margin = Duration::try_hours(hours)?;
        Some(TimeRange {
            start: self.start.checked_sub_signed(margin)?,
            end: self.end.checked_add_signed(margin)?,
        })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub fn of(instant: DateTime<Utc>) -> Self {
        match instant.hour() {
            0..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            _ => TimeOfDay::Evening,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeOfDay::Morning => write!(f, "morning"),
            TimeOfDay::Afternoon => write!(f, "afternoon"),
            TimeOfDay::Evening => write!(f, "evening"),
        }
    }
}

// ==============================================================================
// CLINIC RESOURCES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub display_name: String,
    pub specialty: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub room_type: Option<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pet {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub full_name: Option<String>,
}

/// Recurring weekly envelope inside which appointments may be placed.
/// An `end_time` at or before `start_time` runs past midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatingWindow {
    pub clinic_id: Uuid,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub by_weekday: Vec<Weekday>,
    pub until: Option<DateTime<Utc>>,
    pub count: Option<u32>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_weekday: Vec::new(),
            until: None,
            count: None,
        }
    }
}

/// Time a doctor, a room, or (with neither set) the whole clinic is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutConstraint {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub is_all_day: bool,
}

impl BlackoutConstraint {
    pub fn is_clinic_wide(&self) -> bool {
        self.doctor_id.is_none() && self.room_id.is_none()
    }

    pub fn applies_to(&self, resource: ResourceRef) -> bool {
        if self.is_clinic_wide() {
            return true;
        }
        match resource.kind {
            ResourceKind::Doctor => self.doctor_id == Some(resource.id),
            ResourceKind::Room => self.room_id == Some(resource.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Doctor,
    Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Uuid,
}

impl ResourceRef {
    pub fn doctor(id: Uuid) -> Self {
        Self { kind: ResourceKind::Doctor, id }
    }

    pub fn room(id: Uuid) -> Self {
        Self { kind: ResourceKind::Room, id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pet,
    Owner,
    Doctor,
    Room,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Pet => write!(f, "pet"),
            EntityKind::Owner => write!(f, "owner"),
            EntityKind::Doctor => write!(f, "doctor"),
            EntityKind::Room => write!(f, "room"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

// ==============================================================================
// APPOINTMENTS AND FEEDBACK
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub pet_id: Uuid,
    pub owner_id: Uuid,
    pub doctor_id: Uuid,
    pub room_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn range(&self) -> Option<TimeRange> {
        TimeRange::new(self.start_time, self.end_time)
    }

    /// Only scheduled appointments hold their doctor and room.
    pub fn occupies(&self, resource: ResourceRef) -> bool {
        if self.status != AppointmentStatus::Scheduled {
            return false;
        }
        match resource.kind {
            ResourceKind::Doctor => self.doctor_id == resource.id,
            ResourceKind::Room => self.room_id == resource.id,
        }
    }

    pub fn conflicts_with(&self, other: &Appointment) -> bool {
        self.clinic_id == other.clinic_id
            && self.status == AppointmentStatus::Scheduled
            && other.status == AppointmentStatus::Scheduled
            && (self.doctor_id == other.doctor_id || self.room_id == other.room_id)
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Links a booking decision to the candidate that was offered and, later, its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_id: Uuid,
    pub user_id: Option<Uuid>,
    pub suggestion_rank: Option<u32>,
    pub suggestion_score: Option<f64>,
    pub suggestion_doctor_id: Uuid,
    pub suggestion_room_id: Uuid,
    pub suggestion_start_time: DateTime<Utc>,
    pub suggestion_end_time: DateTime<Utc>,
    pub reason: Option<String>,
    pub rating: Option<u8>,
    pub sentiment: Option<Sentiment>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    /// Outcome in `[-1, 1]`; a rating wins over sentiment. `None` until feedback arrives.
    pub fn outcome(&self) -> Option<f64> {
        if let Some(rating) = self.rating {
            let clamped = f64::from(rating.clamp(1, 5));
            return Some((clamped - 3.0) / 2.0);
        }
        self.sentiment.map(|sentiment| match sentiment {
            Sentiment::Positive => 1.0,
            Sentiment::Neutral => 0.0,
            Sentiment::Negative => -1.0,
        })
    }
}

// ==============================================================================
// SEARCH REQUEST / CANDIDATES
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    #[default]
    #[serde(alias = "Routine", alias = "standard")]
    Routine,
    #[serde(alias = "Urgent")]
    Urgent,
    #[serde(alias = "Emergency")]
    Emergency,
}

impl Urgency {
    pub fn earliness_multiplier(&self) -> f64 {
        match self {
            Urgency::Routine => 1.0,
            Urgency::Urgent => 3.0,
            Urgency::Emergency => 6.0,
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Routine => write!(f, "routine"),
            Urgency::Urgent => write!(f, "urgent"),
            Urgency::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub clinic_id: Uuid,
    pub duration_minutes: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub reason: Option<String>,
    #[serde(default)]
    pub urgency: Urgency,
    pub pet_id: Option<Uuid>,
    pub doctor_ids: Option<Vec<Uuid>>,
    pub room_ids: Option<Vec<Uuid>>,
    pub required_specialty: Option<String>,
    pub required_room_type: Option<String>,
    #[serde(default)]
    pub required_equipment: Vec<String>,
    pub granularity_minutes: Option<i64>,
    pub limit: Option<usize>,
}

impl AppointmentRequest {
    pub fn new(
        clinic_id: Uuid,
        duration_minutes: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            clinic_id,
            duration_minutes,
            window_start,
            window_end,
            reason: None,
            urgency: Urgency::Routine,
            pet_id: None,
            doctor_ids: None,
            room_ids: None,
            required_specialty: None,
            required_room_type: None,
            required_equipment: Vec::new(),
            granularity_minutes: None,
            limit: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes)
    }

    pub fn window(&self) -> Result<TimeRange, SchedulingError> {
        TimeRange::new(self.window_start, self.window_end).ok_or_else(|| {
            SchedulingError::InvalidWindow(format!(
                "window start {} must be before window end {}",
                self.window_start.to_rfc3339(),
                self.window_end.to_rfc3339()
            ))
        })
    }
}

/// A doctor/room/time tuple that is free for both resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub doctor_id: Uuid,
    pub room_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CandidateSlot {
    pub fn range(&self) -> TimeRange {
        TimeRange { start: self.start_time, end: self.end_time }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingSource {
    Baseline,
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    #[serde(flatten)]
    pub slot: CandidateSlot,
    pub rank: u32,
    pub score: f64,
    pub baseline_score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotSearchOutcome {
    CandidatesReady {
        ranking_source: RankingSource,
        candidates: Vec<RankedCandidate>,
    },
    NoFeasibleSlot,
}

impl SlotSearchOutcome {
    pub fn state(&self) -> RequestState {
        match self {
            SlotSearchOutcome::CandidatesReady { .. } => RequestState::CandidatesReady,
            SlotSearchOutcome::NoFeasibleSlot => RequestState::NoFeasibleSlot,
        }
    }

    pub fn candidates(&self) -> &[RankedCandidate] {
        match self {
            SlotSearchOutcome::CandidatesReady { candidates, .. } => candidates,
            SlotSearchOutcome::NoFeasibleSlot => &[],
        }
    }
}

// ==============================================================================
// BOOKING
// ==============================================================================

/// The candidate a caller picked, echoed back with the rank/score it was offered at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSelection {
    pub doctor_id: Uuid,
    pub room_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rank: Option<u32>,
    pub score: Option<f64>,
}

impl From<&RankedCandidate> for SlotSelection {
    fn from(candidate: &RankedCandidate) -> Self {
        Self {
            doctor_id: candidate.slot.doctor_id,
            room_id: candidate.slot.room_id,
            start_time: candidate.slot.start_time,
            end_time: candidate.slot.end_time,
            rank: Some(candidate.rank),
            score: Some(candidate.score),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub clinic_id: Uuid,
    pub slot: SlotSelection,
    pub pet_id: Uuid,
    pub owner_id: Uuid,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub booked_by: Option<Uuid>,
}

/// Appointment and feedback rows written in one commit.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub appointment: Appointment,
    pub feedback: FeedbackEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub state: RequestState,
    pub appointment: Appointment,
    pub feedback_event_id: Uuid,
    pub attempts: u32,
}

// ==============================================================================
// REQUEST STATE MACHINE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Searching,
    CandidatesReady,
    Selecting,
    Booked,
    Conflict,
    NoFeasibleSlot,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Booked | RequestState::Conflict | RequestState::NoFeasibleSlot
        )
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Searching, CandidatesReady)
                | (Searching, NoFeasibleSlot)
                | (CandidatesReady, Selecting)
                | (Selecting, Booked)
                | (Selecting, Conflict)
                // a conflict sends the caller back to search
                | (Conflict, Searching)
        )
    }

    pub fn transition(self, next: RequestState) -> Result<RequestState, SchedulingError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(SchedulingError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Searching => write!(f, "SEARCHING"),
            RequestState::CandidatesReady => write!(f, "CANDIDATES_READY"),
            RequestState::Selecting => write!(f, "SELECTING"),
            RequestState::Booked => write!(f, "BOOKED"),
            RequestState::Conflict => write!(f, "CONFLICT"),
            RequestState::NoFeasibleSlot => write!(f, "NO_FEASIBLE_SLOT"),
        }
    }
}

// ==============================================================================
// SNAPSHOT AND POLICY
// ==============================================================================

/// Consistent read of one clinic's scheduling state.
#[derive(Debug, Clone, Default)]
pub struct ClinicSnapshot {
    pub clinic_id: Uuid,
    pub doctors: Vec<Doctor>,
    pub rooms: Vec<Room>,
    pub operating_windows: Vec<OperatingWindow>,
    pub blackouts: Vec<BlackoutConstraint>,
    pub appointments: Vec<Appointment>,
    pub feedback: Vec<FeedbackEvent>,
}

impl ClinicSnapshot {
    pub fn doctor(&self, id: Uuid) -> Option<&Doctor> {
        self.doctors.iter().find(|doctor| doctor.id == id)
    }

    pub fn room(&self, id: Uuid) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == id)
    }

    pub fn is_active(&self, resource: ResourceRef) -> Option<bool> {
        match resource.kind {
            ResourceKind::Doctor => self.doctor(resource.id).map(|d| d.is_active),
            ResourceKind::Room => self.room(resource.id).map(|r| r.is_active),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankingPolicy {
    pub earliness_weight: f64,
    pub load_balance_weight: f64,
    pub history_weight: f64,
    /// Padding around the search window when counting resource load.
    pub load_padding_hours: i64,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self {
            earliness_weight: 0.5,
            load_balance_weight: 0.3,
            history_weight: 0.2,
            load_padding_hours: 24,
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("Invalid search window: {0}")]
    InvalidWindow(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown {kind} {id} for this clinic")]
    UnknownResource { kind: EntityKind, id: Uuid },

    #[error("{kind} {id} belongs to a different clinic")]
    CrossTenantReference { kind: EntityKind, id: Uuid },

    #[error("Slot for doctor {doctor_id} and room {room_id} is no longer available")]
    SlotConflict { doctor_id: Uuid, room_id: Uuid },

    #[error("Invalid request state transition {from} -> {to}")]
    InvalidTransition { from: RequestState, to: RequestState },

    #[error("Store error: {0}")]
    Store(String),
}
