// libs/scheduling-cell/tests/slot_search_test.rs
mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use std::collections::HashSet;

use common::*;
use scheduling_cell::models::{
    RankingSource, RequestState, SchedulingError, SlotSearchOutcome, Urgency,
};

#[tokio::test]
async fn monday_morning_opening_is_ranked_first() {
    let store = seeded_store().await;
    let outcome = service(&store, None).find_slots(&search()).await.unwrap();

    assert_eq!(outcome.state(), RequestState::CandidatesReady);
    let best = &outcome.candidates()[0];
    assert_eq!(best.rank, 1);
    assert_eq!(best.slot.start_time, monday(9, 0));
    assert_eq!(best.slot.end_time, monday(9, 30));
    assert!(best.rationale.contains("earliest available opening"));
}

#[tokio::test]
async fn doctor_blackout_pushes_earliest_start() {
    let store = seeded_store().await;
    store.add_blackout(blackout(Some(DOCTOR), monday(9, 0), monday(10, 0))).await;

    let mut request = search();
    request.doctor_ids = Some(vec![DOCTOR]);

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    let earliest = outcome
        .candidates()
        .iter()
        .map(|c| c.slot.start_time)
        .min()
        .unwrap();
    assert_eq!(earliest, monday(10, 0));
}

#[tokio::test]
async fn slots_have_requested_length_and_stay_in_window() {
    let store = seeded_store().await;
    let mut request = search();
    request.duration_minutes = 45;
    request.granularity_minutes = Some(15);

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    assert!(outcome.candidates().len() > 2);

    for candidate in outcome.candidates() {
        assert_eq!(candidate.slot.end_time - candidate.slot.start_time, Duration::minutes(45));
        assert!(candidate.slot.start_time >= request.window_start);
        assert!(candidate.slot.end_time <= request.window_end);
    }
}

#[tokio::test]
async fn ranks_form_a_permutation_with_descending_scores() {
    let store = seeded_store().await;
    let mut request = search();
    request.granularity_minutes = Some(30);

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    let candidates = outcome.candidates();

    let ranks: Vec<u32> = candidates.iter().map(|c| c.rank).collect();
    assert_eq!(ranks, (1..=candidates.len() as u32).collect::<Vec<_>>());
    for pair in candidates.windows(2) {
        assert!(pair[0].score >= pair[1].score);
        if pair[0].score == pair[1].score {
            assert!(
                (pair[0].slot.doctor_id, pair[0].slot.room_id, pair[0].slot.start_time)
                    < (pair[1].slot.doctor_id, pair[1].slot.room_id, pair[1].slot.start_time)
            );
        }
    }

    let unique: HashSet<_> = candidates
        .iter()
        .map(|c| (c.slot.doctor_id, c.slot.room_id, c.slot.start_time))
        .collect();
    assert_eq!(unique.len(), candidates.len());
}

#[tokio::test]
async fn repeated_search_returns_identical_ranking() {
    let store = seeded_store().await;
    let service = service(&store, None);
    let mut request = search();
    request.granularity_minutes = Some(15);

    let first = service.find_slots(&request).await.unwrap();
    let second = service.find_slots(&request).await.unwrap();
    assert_eq!(first.candidates(), second.candidates());
}

#[tokio::test]
async fn closed_day_has_no_feasible_slot() {
    let store = seeded_store().await;
    // Tuesday has no operating window.
    let tuesday = monday(0, 0) + Duration::days(1);
    let request = scheduling_cell::models::AppointmentRequest::new(
        CLINIC,
        30,
        tuesday + Duration::hours(8),
        tuesday + Duration::hours(18),
    );

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    assert_matches!(outcome, SlotSearchOutcome::NoFeasibleSlot);
    assert_eq!(outcome.state(), RequestState::NoFeasibleSlot);
}

#[tokio::test]
async fn limit_truncates_after_ranking() {
    let store = seeded_store().await;
    let mut request = search();
    request.granularity_minutes = Some(15);
    request.limit = Some(3);

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    let ranks: Vec<u32> = outcome.candidates().iter().map(|c| c.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
}

#[tokio::test]
async fn configured_suggestion_cap_applies_without_request_limit() {
    let store = seeded_store().await;
    let config = shared_config::AppConfig {
        max_suggestions: 2,
        slot_granularity_minutes: Some(30),
        ..config()
    };

    let outcome = service_with_config(&config, &store, None)
        .find_slots(&search())
        .await
        .unwrap();
    assert_eq!(outcome.candidates().len(), 2);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let store = seeded_store().await;
    let service = service(&store, None);

    let mut inverted = search();
    inverted.window_end = inverted.window_start;
    assert_matches!(service.find_slots(&inverted).await, Err(SchedulingError::InvalidWindow(_)));

    let mut zero = search();
    zero.duration_minutes = 0;
    assert_matches!(service.find_slots(&zero).await, Err(SchedulingError::InvalidRequest(_)));

    let mut far_future = search();
    far_future.window_end = chrono::DateTime::<chrono::Utc>::MAX_UTC;
    far_future.window_start = far_future.window_end - Duration::hours(4);
    assert_matches!(service.find_slots(&far_future).await, Err(SchedulingError::InvalidWindow(_)));

    let mut stranger = search();
    stranger.room_ids = Some(vec![uuid::Uuid::from_u128(0xFFFF)]);
    assert_matches!(
        service.find_slots(&stranger).await,
        Err(SchedulingError::UnknownResource { .. })
    );
}

#[tokio::test]
async fn oversized_granularity_keeps_only_interval_anchors() {
    let store = seeded_store().await;
    let service = service(&store, None);
    let baseline = service.find_slots(&search()).await.unwrap();

    for minutes in [1_000_000_000_000, i64::MAX] {
        let mut request = search();
        request.granularity_minutes = Some(minutes);

        let outcome = service.find_slots(&request).await.unwrap();
        assert_eq!(outcome.candidates(), baseline.candidates());
        assert!(outcome.candidates().iter().all(|c| c.slot.start_time == monday(9, 0)));
    }
}

#[tokio::test]
async fn recurring_blackout_with_unreachable_repeat_still_blocks_its_seed() {
    let store = seeded_store().await;
    let mut weekly = blackout(Some(DOCTOR), monday(9, 0), monday(10, 0));
    weekly.recurrence = Some("FREQ=WEEKLY;INTERVAL=4000000000".parse().unwrap());
    store.add_blackout(weekly).await;

    let mut request = search();
    request.doctor_ids = Some(vec![DOCTOR]);
    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    assert_eq!(outcome.candidates()[0].slot.start_time, monday(10, 0));
}

#[tokio::test]
async fn emergency_requests_are_noted_in_rationale() {
    let store = seeded_store().await;
    let request = search().with_urgency(Urgency::Emergency);

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    assert_matches!(
        outcome,
        SlotSearchOutcome::CandidatesReady { ranking_source: RankingSource::Baseline, .. }
    );
    assert!(outcome.candidates()[0].rationale.contains("emergency"));
}

#[tokio::test]
async fn specialty_filter_limits_doctors() {
    let store = seeded_store().await;
    let mut request = search();
    request.required_specialty = Some("dentistry".to_string());

    let outcome = service(&store, None).find_slots(&request).await.unwrap();
    assert!(outcome
        .candidates()
        .iter()
        .all(|c| c.slot.doctor_id == SECOND_DOCTOR));
}
