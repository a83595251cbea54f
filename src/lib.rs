pub mod app;
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod output;
pub mod package;
pub mod queue;
pub mod worker;

pub use error::{Error, Result};
