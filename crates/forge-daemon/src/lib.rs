//! # `forge-daemon`
//!
//! The long-lived daemon serving the forge engine over newline-delimited
//! JSON-RPC 2.0 on stdio, and the client-side supervisor that spawns,
//! reattaches to, and restarts it.

#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

pub mod rpc;
pub mod server;
pub mod supervisor;

pub use server::Daemon;
pub use supervisor::DaemonSupervisor;

/// The pid file written under the user's forge home.
pub const DAEMON_PID_FILE: &str = "daemon.pid";

/// Where the daemon's stderr lands.
pub const DAEMON_LOG_FILE: &str = "daemon.log";
