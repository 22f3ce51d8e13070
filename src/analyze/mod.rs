// src/analyze/mod.rs
//! Analysis pipeline: prompt → model → verdict parsing → tagger merge → alert rule.

pub mod alert;
pub mod engine;
pub mod prompt;
pub mod response;
pub mod tagger;

pub use engine::{AnalysisEngine, CycleSummary, EngineSettings};
pub use response::{aggregate_score, parse_verdict, Verdict};
