// libs/scheduling-cell/src/services/ranking.rs
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::models::{
    AppointmentRequest, CandidateSlot, ClinicSnapshot, RankedCandidate, RankingPolicy,
    RankingSource, ResourceRef, TimeOfDay, TimeRange, Urgency,
};
use crate::services::advisor::{AdvisoryCandidate, AdvisoryProposal, AdvisoryRequest, RankingAdvisor};
use crate::services::insights;

/// Per-candidate terms before weighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreTerms {
    pub earliness: f64,
    pub load_balance: f64,
    pub history: f64,
}

pub struct RankingEngine {
    policy: RankingPolicy,
    advisor: Option<Arc<dyn RankingAdvisor>>,
    advisor_timeout: Duration,
}

impl RankingEngine {
    pub fn new(
        policy: RankingPolicy,
        advisor: Option<Arc<dyn RankingAdvisor>>,
        advisor_timeout: Duration,
    ) -> Self {
        Self { policy, advisor, advisor_timeout }
    }

    pub fn from_config(config: &AppConfig, advisor: Option<Arc<dyn RankingAdvisor>>) -> Self {
        Self::new(
            RankingPolicy::default(),
            advisor,
            Duration::from_millis(config.advisor_timeout_ms),
        )
    }

    pub fn baseline_only(policy: RankingPolicy) -> Self {
        Self::new(policy, None, Duration::ZERO)
    }

    /// Deterministic order: score descending, then doctor id, room id, start.
    pub fn baseline(
        &self,
        candidates: &[CandidateSlot],
        request: &AppointmentRequest,
        window: TimeRange,
        snapshot: &ClinicSnapshot,
    ) -> Vec<RankedCandidate> {
        let loads: Vec<usize> = candidates
            .iter()
            .map(|c| resource_load(snapshot, c, window, self.policy.load_padding_hours))
            .collect();
        let max_load = loads.iter().copied().max().unwrap_or(0);

        let mut scored: Vec<(CandidateSlot, f64, String)> = candidates
            .iter()
            .zip(loads)
            .map(|(candidate, load)| {
                let terms = ScoreTerms {
                    earliness: earliness(candidate, request.duration(), window),
                    load_balance: load_balance(load, max_load),
                    history: historical_affinity(snapshot, candidate, request.reason.as_deref()),
                };
                let score = self.weighted(terms, request.urgency);
                let rationale = self.rationale(terms, request.urgency);
                (*candidate, score, rationale)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.doctor_id.cmp(&b.0.doctor_id))
                .then_with(|| a.0.room_id.cmp(&b.0.room_id))
                .then_with(|| a.0.start_time.cmp(&b.0.start_time))
        });

        scored
            .into_iter()
            .enumerate()
            .map(|(index, (slot, score, rationale))| RankedCandidate {
                slot,
                rank: index as u32 + 1,
                score,
                baseline_score: score,
                rationale,
            })
            .collect()
    }

    /// Baseline ranking, optionally re-ordered by the advisor. Advisor
    /// failures, timeouts and invalid proposals yield the baseline unchanged.
    #[instrument(skip_all, fields(clinic_id = %snapshot.clinic_id, candidates = candidates.len()))]
    pub async fn rank(
        &self,
        candidates: &[CandidateSlot],
        request: &AppointmentRequest,
        window: TimeRange,
        snapshot: &ClinicSnapshot,
    ) -> (RankingSource, Vec<RankedCandidate>) {
        let baseline = self.baseline(candidates, request, window, snapshot);

        let Some(advisor) = self.advisor.as_ref() else {
            return (RankingSource::Baseline, baseline);
        };
        if baseline.len() < 2 {
            return (RankingSource::Baseline, baseline);
        }

        let advisory_request = advisory_request(&baseline, request, snapshot);
        let proposal = match tokio::time::timeout(self.advisor_timeout, advisor.propose(&advisory_request)).await {
            Ok(Ok(proposal)) => proposal,
            Ok(Err(e)) => {
                warn!("Ranking advisor failed, keeping baseline order: {}", e);
                return (RankingSource::Baseline, baseline);
            }
            Err(_) => {
                warn!(
                    "Ranking advisor exceeded {}ms, keeping baseline order",
                    self.advisor_timeout.as_millis()
                );
                return (RankingSource::Baseline, baseline);
            }
        };

        match apply_proposal(&baseline, &proposal) {
            Some(reordered) => {
                info!("Applied advisory ranking to {} candidates", reordered.len());
                (RankingSource::Advisory, reordered)
            }
            None => {
                warn!(
                    "Ranking advisor proposal {:?} is not a permutation of 1..={}, keeping baseline order",
                    proposal.order(),
                    baseline.len()
                );
                (RankingSource::Baseline, baseline)
            }
        }
    }

    fn weighted(&self, terms: ScoreTerms, urgency: Urgency) -> f64 {
        let earliness_weight = self.policy.earliness_weight * urgency.earliness_multiplier();
        let total = earliness_weight + self.policy.load_balance_weight + self.policy.history_weight;
        if total <= 0.0 {
            return 0.0;
        }
        (earliness_weight * terms.earliness
            + self.policy.load_balance_weight * terms.load_balance
            + self.policy.history_weight * terms.history)
            / total
    }

    fn rationale(&self, terms: ScoreTerms, urgency: Urgency) -> String {
        let earliness_weight = self.policy.earliness_weight * urgency.earliness_multiplier();
        let mut contributions = [
            (earliness_weight * terms.earliness, "earliest available opening"),
            (self.policy.load_balance_weight * terms.load_balance, "balances workload"),
            (
                self.policy.history_weight * terms.history.abs(),
                if terms.history >= 0.0 {
                    "matches well-received past bookings"
                } else {
                    "historically less favoured"
                },
            ),
        ];
        contributions.sort_by(|a, b| b.0.total_cmp(&a.0));

        let top = contributions[0].0;
        let mut parts: Vec<&str> = contributions
            .iter()
            .filter(|(value, _)| *value > 0.0 && *value >= top / 2.0)
            .map(|(_, phrase)| *phrase)
            .collect();
        if parts.is_empty() {
            parts.push("open for the requested duration");
        }

        match urgency {
            Urgency::Routine => {}
            Urgency::Urgent => parts.push("prioritised for an urgent visit"),
            Urgency::Emergency => parts.push("prioritised for an emergency"),
        }
        parts.join("; ")
    }
}

/// `1` at the window start, `0` at the latest start that still fits.
pub fn earliness(candidate: &CandidateSlot, duration: ChronoDuration, window: TimeRange) -> f64 {
    let span = (window.end - duration - window.start).num_seconds();
    if span <= 0 {
        return 1.0;
    }
    let offset = (candidate.start_time - window.start).num_seconds() as f64;
    (1.0 - offset / span as f64).clamp(0.0, 1.0)
}

pub fn load_balance(load: usize, max_load: usize) -> f64 {
    if max_load == 0 {
        return 1.0;
    }
    1.0 - load as f64 / max_load as f64
}

/// Scheduled appointments of the candidate's doctor plus its room around the window.
fn resource_load(
    snapshot: &ClinicSnapshot,
    candidate: &CandidateSlot,
    window: TimeRange,
    padding_hours: i64,
) -> usize {
    let padded = window.padded(padding_hours).unwrap_or(window);
    let doctor = ResourceRef::doctor(candidate.doctor_id);
    let room = ResourceRef::room(candidate.room_id);

    snapshot
        .appointments
        .iter()
        .filter(|a| a.range().is_some_and(|r| r.overlaps(&padded)))
        .map(|a| usize::from(a.occupies(doctor)) + usize::from(a.occupies(room)))
        .sum()
}

/// Weighted mean outcome of earlier bookings with the same doctor in the same
/// part of the day. Matching visit reasons count double.
pub fn historical_affinity(snapshot: &ClinicSnapshot, candidate: &CandidateSlot, reason: Option<&str>) -> f64 {
    let bucket = TimeOfDay::of(candidate.start_time);
    let (weighted_sum, total_weight) = snapshot
        .feedback
        .iter()
        .filter(|event| event.suggestion_doctor_id == candidate.doctor_id)
        .filter(|event| TimeOfDay::of(event.suggestion_start_time) == bucket)
        .filter_map(|event| {
            let outcome = event.outcome()?;
            let same_reason = matches!(
                (reason, event.reason.as_deref()),
                (Some(wanted), Some(past)) if wanted.trim().eq_ignore_ascii_case(past.trim())
            );
            Some((outcome, if same_reason { 1.0 } else { 0.5 }))
        })
        .fold((0.0, 0.0), |(sum, weights), (outcome, weight)| {
            (sum + outcome * weight, weights + weight)
        });

    if total_weight == 0.0 {
        0.0
    } else {
        weighted_sum / total_weight
    }
}

fn advisory_request(
    baseline: &[RankedCandidate],
    request: &AppointmentRequest,
    snapshot: &ClinicSnapshot,
) -> AdvisoryRequest {
    AdvisoryRequest {
        clinic_id: request.clinic_id,
        reason: request.reason.clone(),
        urgency: request.urgency,
        duration_minutes: request.duration_minutes,
        candidates: baseline
            .iter()
            .map(|ranked| {
                let doctor = snapshot.doctor(ranked.slot.doctor_id);
                AdvisoryCandidate {
                    slot_id: ranked.rank,
                    doctor_id: ranked.slot.doctor_id,
                    doctor_name: doctor.map(|d| d.display_name.clone()),
                    doctor_specialty: doctor.and_then(|d| d.specialty.clone()),
                    room_id: ranked.slot.room_id,
                    start_time: ranked.slot.start_time,
                    end_time: ranked.slot.end_time,
                    baseline_score: ranked.baseline_score,
                }
            })
            .collect(),
        insights: insights::summarize(&snapshot.feedback, &snapshot.doctors),
    }
}

/// Reorders `baseline` by the proposal if it names every slot id exactly once.
/// Scores are reassigned as `(n - i) / n` so they keep decreasing with rank.
pub fn apply_proposal(baseline: &[RankedCandidate], proposal: &AdvisoryProposal) -> Option<Vec<RankedCandidate>> {
    let n = baseline.len();
    let order = proposal.order();
    if order.len() != n {
        return None;
    }
    let mut seen = HashSet::with_capacity(n);
    if !order.iter().all(|id| (1..=n as u32).contains(id) && seen.insert(*id)) {
        return None;
    }

    let reordered = proposal
        .recommendations
        .iter()
        .enumerate()
        .map(|(index, recommendation)| {
            let offered = &baseline[recommendation.slot_id as usize - 1];
            let rationale = if recommendation.rationale.is_empty() {
                offered.rationale.clone()
            } else {
                format!("{}; advisor: {}", offered.rationale, recommendation.rationale)
            };
            RankedCandidate {
                slot: offered.slot,
                rank: index as u32 + 1,
                score: (n - index) as f64 / n as f64,
                baseline_score: offered.baseline_score,
                rationale,
            }
        })
        .collect();

    debug!("Advisor order accepted: {:?}", order);
    Some(reordered)
}
