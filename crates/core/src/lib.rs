//! # calltrace core
//!
//! Domain types, traits, and error definitions for intercepting calls to LLM
//! provider clients. This crate has **no I/O dependencies**. It defines the
//! model that the proxy, the emitters and the provider targets implement
//! against.
//!
//! ## Design
//!
//! Every seam is a trait here:
//! - [`Target`], [`Callable`], [`Constructor`] describe what a wrappable
//!   client can do;
//! - [`TelemetryEmitter`] is where finished calls go.
//!
//! Implementations live in their respective crates, so tests can swap in
//! scripted targets and recording emitters.

pub mod emitter;
pub mod envelope;
pub mod error;
pub mod provider;
pub mod target;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use emitter::{TelemetryEmitter, TelemetryRecord};
pub use envelope::CallEnvelope;
pub use error::{CallerError, Error, ProviderError, Result, TelemetryError};
pub use provider::ProviderKind;
pub use target::{
    CallResult, Callable, ChunkIter, ChunkStream, Constructor, Member, Resolved, Target,
    TargetResult,
};
pub use value::{ArgValue, Args, Kwargs};
