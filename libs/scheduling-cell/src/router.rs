// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{routing::post, Router};

use crate::handlers::{self, SchedulingState};

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    Router::new()
        .route("/find-slots", post(handlers::find_slots))
        .route("/book", post(handlers::book_appointment))
        .with_state(state)
}
