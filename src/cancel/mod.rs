//! Cancellation primitives
//!
//! Wraps tokio-util's token with the disposal semantics the command core
//! relies on.

pub mod handle;

pub use handle::CancellationHandle;
pub use tokio_util::sync::CancellationToken;
