//! # `forge-engine`
//!
//! Projects a discovered project graph into a task graph and executes it:
//! the task graph builder, the layered execution plan, the work-stealing
//! scheduler, and the local process executor live here. The remote executor
//! plugs in through the [`TaskExecutor`](executor::TaskExecutor) seam.

#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate serde;

#[macro_use]
extern crate log;

pub mod builder;
pub mod error;
pub mod executor;
pub mod graph;
pub mod local;
pub mod plan;
pub mod scheduler;
pub mod task;

pub use builder::TaskGraphBuilder;
pub use error::ConstructionError;
pub use executor::{CancellationToken, TaskExecutor};
pub use graph::TaskGraph;
pub use plan::ExecutionPlan;
pub use scheduler::{ExecutionReport, Scheduler, SchedulerOptions};
pub use task::{Task, TaskResult, TaskState};
