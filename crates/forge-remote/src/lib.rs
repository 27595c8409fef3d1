//! # `forge-remote`
//!
//! Bridges forge tasks onto services speaking the Bazel Remote Execution
//! v2 wire protocol: input trees become content-addressed `Directory`
//! messages, targets become `Command`/`Action` pairs, and execution flows
//! through the Action Cache, the CAS, and the Execution service.

#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate log;

pub mod client;
pub mod digest;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod merkle;
pub mod proto;

pub use client::{GrpcRev2Client, Rev2Services};
pub use endpoint::ResolvedEndpoint;
pub use error::RemoteError;
pub use executor::RemoteExecutor;
