use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tracing::{info, warn};

use scheduling_cell::handlers::SchedulingState;
use scheduling_cell::router::scheduling_routes;
use scheduling_cell::services::advisor::{OllamaRankingAdvisor, RankingAdvisor};
use scheduling_cell::services::memory::InMemorySchedulingStore;
use scheduling_cell::services::store::SchedulingStore;
use scheduling_cell::services::supabase::SupabaseSchedulingStore;
use shared_config::{AppConfig, StoreBackend};

/// Picks the store and advisor the configuration asks for.
pub fn build_state(config: Arc<AppConfig>) -> Arc<SchedulingState> {
    let store: Arc<dyn SchedulingStore> = match config.store_backend {
        StoreBackend::Supabase => {
            info!("Using PostgREST scheduling store at {}", config.supabase_url);
            Arc::new(SupabaseSchedulingStore::new(&config))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory scheduling store; bookings are lost on restart");
            Arc::new(InMemorySchedulingStore::new())
        }
    };

    let advisor: Option<Arc<dyn RankingAdvisor>> = match OllamaRankingAdvisor::from_config(&config) {
        Some(advisor) => {
            info!("Advisory ranking enabled with model {}", config.ollama_model);
            Some(Arc::new(advisor))
        }
        None => None,
    };

    Arc::new(SchedulingState::new(&config, store, advisor))
}

pub fn create_router(state: Arc<SchedulingState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduler API is running!" }))
        .nest("/scheduling", scheduling_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn mounts_scheduling_routes() {
        let app = create_router(build_state(Arc::new(AppConfig::default())));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/scheduling/find-slots")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "clinic_id": "00000000-0000-0000-0000-000000000001",
                            "duration_minutes": 30,
                            "window_start": "2024-05-06T10:00:00Z",
                            "window_end": "2024-05-06T09:00:00Z"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
