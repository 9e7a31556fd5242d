//! foreman-core
//!
//! Coordination layer for a fleet of cooperating automation agents that share
//! one state directory.
//!
//! # Modules
//! - **domain**: records (tasks, agent status, signatures, history, decisions)
//! - **store**: atomic JSON documents, JSONL logs, transient-I/O retry
//! - **status** / **queue**: liveness registry and the shared work queue
//! - **knowledge** / **decision**: outcome history and remediation choice
//! - **governor**: quota and circuit-breaker gate for costly escalations
//! - **app** / **worker**: wiring and the async worker loop
//! - **ports**: clock and id seams

pub mod app;
pub mod config;
pub mod decision;
pub mod domain;
pub mod error;
pub mod governor;
pub mod identity;
pub mod knowledge;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod status;
pub mod store;
pub mod worker;

pub use app::{Foreman, ForemanBuilder};
pub use config::ForemanConfig;
pub use error::{ErrorKind, ForemanError, Result};
pub use worker::{TaskHandler, TaskRunReport, Worker, WorkerGroup};
