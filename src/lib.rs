//! job-worker — core library
//!
//! Provides the job supervision core (`core`), the gRPC service surface
//! and mTLS plumbing (`api`), the CLI client (`cli`), and process
//! configuration (`config`).

pub mod config;
pub mod core;
pub mod error;

pub mod api;
pub mod cli;

/// Generated protobuf/gRPC types for the job-worker service.
pub mod proto {
    tonic::include_proto!("job_worker");
}
