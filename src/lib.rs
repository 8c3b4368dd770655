pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod playbooks;
pub mod reporting;
pub mod scoring;
pub mod store;
pub mod telemetry;
