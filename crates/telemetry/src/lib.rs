//! Telemetry emitters for calltrace.
//!
//! Ships finished calls to a remote tracking endpoint and a relational log
//! store. All emitters are blocking; the proxy runs them off the caller's
//! executor on suspending paths.

pub mod emitter;
pub mod flatten;
pub mod logstore;
pub mod memory;
pub mod remote;

pub use emitter::AnalyticsEmitter;
pub use logstore::SqlLogStore;
pub use memory::InMemoryEmitter;
pub use remote::RemoteTracker;
