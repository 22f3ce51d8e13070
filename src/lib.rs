// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod models;
pub mod notify;
pub mod periodic;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{AnalysisEngine, CycleSummary, EngineSettings};
pub use crate::api::{router, AppState};
pub use crate::config::SentinelConfig;
pub use crate::ingest::{CollectorScheduler, CycleReport, SourceProvider};
pub use crate::model::{build_model_client, DynModelClient, ModelClient};
pub use crate::notify::{AlertSink, NotifierMux};
pub use crate::store::Store;
