//! Async command execution
//!
//! AsyncCommand -> InvocationRegistry (live handles + counter)
//!              -> InvocationContext (per-invocation handle, flow-scoped)

pub mod async_command;
pub mod context;
pub mod registry;

pub use async_command::{AsyncCommand, AsyncCommandBuilder, WorkFuture};
pub use context::InvocationContext;
pub use registry::{InvocationInfo, InvocationRegistry};
