//! The task-graph execution engine — dispatcher and per-message loop.

pub mod dispatcher;
pub mod executor;

pub use dispatcher::spawn_dispatcher;
pub use executor::{Executor, MessageOutcome};
