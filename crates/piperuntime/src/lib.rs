//! Pipeline runtime
//!
//! This crate turns raw pipeline definitions into task graphs, owns the
//! scheduler that runs them, and routes sends between workers.

mod builder;
mod cluster;
mod config;
mod graph;
mod parser;
mod registry;
mod router;
mod scheduler;

pub use builder::GraphBuilder;
pub use cluster::{Delivery, Inbox, LocalChannel, LocalCluster};
pub use config::SchedulerConfig;
pub use graph::{TaskGraph, TaskStages};
pub use parser::{ConfigParser, FileConfigParser, RawGraph};
pub use registry::{FnFactory, PluginFactory, PluginMetadata, PluginRegistry};
pub use router::{RemoteSend, Route, SingleWorker, WorkerChannel, WorkerRouter};
pub use scheduler::{RunHandle, Scheduler, SchedulerBuilder};
