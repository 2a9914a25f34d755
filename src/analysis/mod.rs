//! Analysis core: the retrying service client, typed payloads, face
//! correlation, result rendering, and the per-task orchestration pipelines.

pub mod client;
pub mod faces;
pub mod orchestrator;
pub mod render;
pub mod speech;
pub mod vision;

pub use client::{Outcome, ServiceClient};
pub use orchestrator::{AnalysisBackend, AnalysisTask, HttpBackend, Reply};
