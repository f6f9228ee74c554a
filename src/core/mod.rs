pub mod analysis;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod selection;
pub mod video;

pub use config::EngineConfig;
pub use error::AnalysisError;
