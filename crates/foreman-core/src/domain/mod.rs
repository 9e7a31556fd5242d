//! Domain model (ids, agents, tasks, situations, history, decisions).

pub mod agent;
pub mod attempt;
pub mod decision;
pub mod ids;
pub mod situation;
pub mod task;

pub use agent::{AgentState, AgentStatus};
pub use attempt::{ActionRecord, CorrelationEntry};
pub use decision::{Alternative, Decision, Disposition, Verification};
pub use ids::{ActionId, TaskId};
pub use situation::{Category, Severity, SituationSignature};
pub use task::{NewTask, TaskItem};
