pub mod batch;
pub mod commands;
