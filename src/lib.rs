pub mod models;
pub mod error;
pub mod token;
pub mod verdict;
pub mod engine;
pub mod auth;
pub mod config;
pub mod browser;
pub mod watchers;
pub mod evidence;
pub mod mutator;
pub mod response_analysis;
pub mod probes;
pub mod seed;
pub mod flows;
pub mod orchestrator;
pub mod reporting;

// Re-export commonly used items
pub use models::*;
pub use error::*;
pub use verdict::*;
pub use engine::*;
pub use auth::*;
pub use config::*;
pub use browser::*;
pub use evidence::{EvidenceStore, ExchangeRecord};
pub use orchestrator::Orchestrator;
pub use reporting::*;
