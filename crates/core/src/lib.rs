//! Core domain types and shared logic for the artifactci upload service.
//!
//! This crate defines the data model used across all other crates:
//! - Bulk upload request/response contract and its validation
//! - Token payloads carried inside signed client tokens
//! - Entrypoint inference over uploaded file trees
//! - CI job status model and job matching
//! - Alias types, cache and content-disposition policy

pub mod artifact;
pub mod config;
pub mod entrypoint;
pub mod error;
pub mod job;
pub mod mime;
pub mod permission;
pub mod token;
pub mod upload;

pub use artifact::{AliasType, ArtifactId};
pub use entrypoint::{EntrypointResolution, PathAliases, resolve_entrypoints};
pub use error::{Error, Result};
pub use job::{Job, JobStatus, match_job};
pub use permission::PermissionLevel;
pub use token::{ClientTokenClaims, TokenPayload};
pub use upload::{
    BulkFile, BulkRequest, BulkResponse, BulkResult, ClientPayload, GithubActionsContext,
    UploadRequestId,
};

/// Recommended number of files declared per bulk request.
pub const BULK_CHUNK_SIZE: usize = 500;

/// Maximum retention a CI job may request, in days.
pub const MAX_RETENTION_DAYS: u16 = 400;
