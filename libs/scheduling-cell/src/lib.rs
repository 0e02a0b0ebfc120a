// libs/scheduling-cell/src/lib.rs
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::SchedulingState;
pub use router::scheduling_routes;
pub use services::scheduler::SchedulingService;
