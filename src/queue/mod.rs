pub mod icon;
pub mod subprocess_queue;
