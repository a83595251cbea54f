pub mod details;
pub mod sanitizer;
pub mod table;
