//! HTTP server for artifactci.
//!
//! This crate provides the upload and resolution endpoints:
//! - Bulk upload protocol with job-status verification and the upload ledger
//! - Client-token direct blob uploads and completion recording
//! - Artifact resolution with permission checks and alias-aware caching
//! - GitHub webhook ingestion and the retention sweeper

pub mod auth;
pub mod error;
pub mod github;
pub mod handlers;
pub mod job_status;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use auth::TraceId;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
