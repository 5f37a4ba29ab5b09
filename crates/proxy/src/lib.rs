//! # calltrace proxy
//!
//! The interception layer. [`InterceptingProxy`] wraps a provider client,
//! rewraps every object, function and class reached through it, and turns
//! each invocation into exactly one telemetry emission:
//!
//! - immediate results are emitted as soon as the wrapped call returns;
//! - incremental results are wrapped in a reassembler that passes every
//!   chunk through untouched and emits the reconciled response once the
//!   provider's terminal chunk is seen.
//!
//! Telemetry is strictly best-effort. Nothing that goes wrong on the
//! emission path reaches the caller; errors raised by the wrapped client
//! reach the caller unchanged.

pub mod classifier;
pub mod delivery;
pub mod finish;
pub mod proxy;
pub mod reassembler;

pub use classifier::{Classified, classify};
pub use delivery::Delivery;
pub use finish::Telemetry;
pub use proxy::{Accessed, Intercepted, InterceptingProxy, RETURN_ID_KEY, Response, TAGS_KEY};
pub use reassembler::{BlockingReassembler, SuspendingReassembler, reconcile};
