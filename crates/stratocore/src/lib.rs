//! Core abstractions for the strato workflow engine
//!
//! This crate provides the persisted entities (flows and their task DAGs),
//! the contracts the engine schedules against (`Action`, `Backend`), and the
//! error taxonomy shared by every other component.

mod action;
mod backend;
mod error;
mod flow;
mod memory;
mod task;

pub use action::{Action, ActionContext};
pub use backend::Backend;
pub use error::{ActionError, BackendError, EngineError, GraphError, StateError};
pub use flow::{Flow, FlowId, FlowState};
pub use memory::MemoryBackend;
pub use task::{Task, TaskId, TaskSpec, TaskState};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
