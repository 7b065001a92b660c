//! Async Command - multi-execution async command coordinator
//!
//! A single logical command that can be invoked many times concurrently,
//! tracks every in-flight invocation, and cancels them as a group.

pub mod cancel;
pub mod command;
pub mod core;
pub mod notify;

pub use crate::cancel::{CancellationHandle, CancellationToken};
pub use crate::command::{AsyncCommand, AsyncCommandBuilder, InvocationContext, InvocationInfo};
pub use crate::core::config::{CommandConfig, DemoConfig};
pub use crate::core::error::{CommandError, Result};
pub use crate::core::types::{CancellationState, CommandId, InvocationId, PropertyName};
pub use crate::notify::SubscriptionId;
