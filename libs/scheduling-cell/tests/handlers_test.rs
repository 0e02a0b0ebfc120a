// libs/scheduling-cell/tests/handlers_test.rs
mod common;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use scheduling_cell::handlers::{self, SchedulingState};
use scheduling_cell::router::scheduling_routes;
use scheduling_cell::services::store::SchedulingStore;

async fn state() -> Arc<SchedulingState> {
    let store: Arc<dyn SchedulingStore> = seeded_store().await;
    Arc::new(SchedulingState::new(&config(), store, None))
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn search_body() -> Value {
    serde_json::to_value(search()).unwrap()
}

#[tokio::test]
async fn find_slots_handler_returns_ranked_candidates() {
    let Json(body) = handlers::find_slots(State(state().await), Json(search()))
        .await
        .unwrap();

    assert_eq!(body["state"], "candidates_ready");
    assert_eq!(body["ranking_source"], "baseline");
    let first = &body["candidates"][0];
    assert_eq!(first["rank"], 1);
    assert!(first["score"].is_number());
    assert!(first["rationale"].is_string());
    assert_eq!(first["start_time"], "2024-05-06T09:00:00Z");
}

#[tokio::test]
async fn find_slots_reports_no_feasible_slot() {
    let app = scheduling_routes(state().await);
    let mut body = search_body();
    body["window_start"] = json!("2024-05-07T08:00:00Z");
    body["window_end"] = json!("2024-05-07T12:00:00Z");

    let (status, body) = post(app, "/find-slots", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "state": "no_feasible_slot" }));
}

#[tokio::test]
async fn book_then_rebook_reports_conflict_state() {
    let state = state().await;

    let (_, found) = post(scheduling_routes(state.clone()), "/find-slots", search_body()).await;
    let candidate = &found["candidates"][0];
    let booking = json!({
        "clinic_id": CLINIC,
        "slot": {
            "doctor_id": candidate["doctor_id"],
            "room_id": candidate["room_id"],
            "start_time": candidate["start_time"],
            "end_time": candidate["end_time"],
            "rank": candidate["rank"],
            "score": candidate["score"]
        },
        "pet_id": PET,
        "owner_id": OWNER,
        "reason": "vaccination"
    });

    let (status, booked) = post(scheduling_routes(state.clone()), "/book", booking.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booked["state"], "booked");
    assert_eq!(booked["appointment"]["status"], "scheduled");
    assert!(booked["feedback_event_id"].is_string());

    let (status, conflict) = post(scheduling_routes(state), "/book", booking).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["state"], "conflict");
}

#[tokio::test]
async fn cross_clinic_pet_is_forbidden() {
    let state = state().await;
    let request = {
        let candidate = state.service.find_slots(&search()).await.unwrap().candidates()[0].clone();
        let mut request = booking_for(&candidate);
        request.pet_id = FOREIGN_PET;
        request
    };

    let response = handlers::book_appointment(State(state), Json(request))
        .await
        .unwrap_err()
        .into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn inverted_window_is_a_bad_request() {
    let app = scheduling_routes(state().await);
    let mut body = search_body();
    body["window_end"] = body["window_start"].clone();

    let (status, body) = post(app, "/find-slots", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("window"));
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let app = scheduling_routes(state().await);
    let mut body = search_body();
    body["doctor_ids"] = json!(["00000000-0000-0000-0000-00000000ffff"]);

    let (status, _) = post(app, "/find-slots", body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
