//! Repository traits for metadata operations.

pub mod artifacts;
pub mod repositories;
pub mod upload_requests;
pub mod uploads;

pub use artifacts::ArtifactRepo;
pub use repositories::RepositoryRepo;
pub use upload_requests::UploadRequestRepo;
pub use uploads::UploadRepo;
