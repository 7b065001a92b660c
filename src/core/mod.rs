pub mod config;
pub mod error;
pub mod types;

pub use config::{CommandConfig, DemoConfig};
pub use error::{CommandError, Result};
pub use types::{CancellationState, CommandId, InvocationId, PropertyName};
