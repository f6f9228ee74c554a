pub mod analyzer;
pub mod models;
