pub mod job_manager;
pub mod log_store;
pub mod poll;
