//! Provider clients exposed as wrappable calltrace targets.
//!
//! Each provider is a root [`Target`](calltrace_core::Target) shaped like the
//! vendor SDK it stands in for, so the intercepting proxy can wrap it and
//! record every call made through it.

pub mod openai;
pub mod sse;

pub use openai::{OpenAiClient, OpenAiModule};
