//! The gRPC surface: wire types, the `JobService` implementation, and
//! the mTLS transport/authentication plumbing around it.

pub mod middleware;
pub mod service;
pub mod tls;

pub use service::JobService;
