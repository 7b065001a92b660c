//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for one invocation of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a command instance
///
/// Used to scope the ambient current-invocation lookup so nested
/// invocations of different commands never see each other's handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

/// Properties announced through the property-changed channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyName {
    IsExecuting,
    CanExecute,
    IsCancellationRequested,
}

impl PropertyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyName::IsExecuting => "IsExecuting",
            PropertyName::CanExecute => "CanExecute",
            PropertyName::IsCancellationRequested => "IsCancellationRequested",
        }
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group cancellation state of a command
///
/// Stored as a `u8` inside an atomic; the discriminants are relied upon
/// by `from_u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CancellationState {
    NotCanceled = 0,
    Notifying = 1,
}

impl CancellationState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => CancellationState::NotCanceled,
            _ => CancellationState::Notifying,
        }
    }
}
