//! Internal error taxonomy for the job-worker core and its gRPC surface.
//!
//! Core and store operations never throw past the supervisor; a
//! `JobError` is only produced at request-handling boundaries (see
//! `api::service`) and converted to a `tonic::Status` exactly once, at
//! the edge.

use thiserror::Error;

/// Errors surfaced by `JobService` operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// No client identity was present, or it was empty.
    #[error("missing or empty client identity")]
    AuthFailure,

    /// The referenced job id does not exist.
    #[error("job not found")]
    NotFound,

    /// The job exists but belongs to a different client.
    #[error("job belongs to another client")]
    Ownership,

    /// The operation requires a particular job state that does not hold.
    #[error("job is not in the required state")]
    InvalidState,

    /// The OutputBuffer (or other job resources) could not be constructed.
    #[error("failed to construct job: {0}")]
    Construction(String),

    /// A read against a job's output failed.
    #[error("output read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Signalling a running child failed.
    #[error("failed to signal job: {0}")]
    Signal(String),
}

impl From<JobError> for tonic::Status {
    fn from(err: JobError) -> Self {
        match err {
            JobError::AuthFailure | JobError::Ownership => {
                tonic::Status::permission_denied(err.to_string())
            }
            JobError::NotFound => tonic::Status::not_found(err.to_string()),
            JobError::InvalidState => tonic::Status::failed_precondition(err.to_string()),
            JobError::Construction(_) => tonic::Status::aborted(err.to_string()),
            JobError::Io(_) | JobError::Signal(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_not_found_status() {
        let status: tonic::Status = JobError::NotFound.into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn ownership_maps_to_permission_denied() {
        let status: tonic::Status = JobError::Ownership.into();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }

    #[test]
    fn invalid_state_maps_to_failed_precondition() {
        let status: tonic::Status = JobError::InvalidState.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }

    #[test]
    fn construction_maps_to_aborted() {
        let status: tonic::Status = JobError::Construction("boom".into()).into();
        assert_eq!(status.code(), tonic::Code::Aborted);
    }
}
