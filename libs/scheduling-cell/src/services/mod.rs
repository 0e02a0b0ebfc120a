// libs/scheduling-cell/src/services/mod.rs
pub mod advisor;
pub mod availability;
pub mod booking;
pub mod insights;
pub mod memory;
pub mod ranking;
pub mod recurrence;
pub mod scheduler;
pub mod slots;
pub mod store;
pub mod supabase;
