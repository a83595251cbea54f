pub mod job;
pub mod listing;
pub mod message;
