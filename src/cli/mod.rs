//! The `jobctl` command-line client: dials the server over mutual TLS
//! and dispatches the four subcommands onto the generated gRPC client.

pub mod client;

pub use client::{Cli, Command};
