//! Target traits — the capability set of a wrappable client object.
//!
//! A wrapped client is any value that exposes members by name. Each member
//! is either a plain value, a nested object, a function, or a class. The
//! proxy rewraps objects, functions and classes on access, and hands plain
//! values back untouched.
//!
//! Implementations: the OpenAI-compatible client in `calltrace-providers`,
//! and the scripted test doubles in the proxy tests.

use crate::error::ProviderError;
use crate::value::{Args, Kwargs};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Result alias for target operations.
pub type TargetResult<T> = std::result::Result<T, ProviderError>;

/// A blocking chunk source (the blocking-pull side of a streamed response).
pub type ChunkIter = Box<dyn Iterator<Item = TargetResult<Value>> + Send>;

/// A suspending chunk source (the suspending-pull side of a streamed response).
pub type ChunkStream = BoxStream<'static, TargetResult<Value>>;

/// An object whose members can be read, written and deleted by name.
pub trait Target: Send + Sync {
    /// Resolve a member.
    fn get(&self, name: &str) -> TargetResult<Member>;

    /// Assign a plain value to a member.
    ///
    /// Default implementation rejects every write.
    fn set(&self, name: &str, _value: Value) -> TargetResult<()> {
        Err(ProviderError::ReadOnly(name.to_string()))
    }

    /// Remove a member.
    ///
    /// Default implementation rejects every delete.
    fn delete(&self, name: &str) -> TargetResult<()> {
        Err(ProviderError::ReadOnly(name.to_string()))
    }
}

/// Something that can be invoked with positional and keyword arguments.
pub trait Callable: Send + Sync {
    fn call(&self, args: Args, kwargs: Kwargs) -> TargetResult<CallResult>;
}

/// Something that constructs new target instances (a class).
pub trait Constructor: Send + Sync {
    fn construct(&self, args: Args, kwargs: Kwargs) -> TargetResult<Arc<dyn Target>>;
}

/// What a member lookup resolves to.
#[derive(Clone)]
pub enum Member {
    /// A plain, non-callable value.
    Value(Value),
    /// A nested object (e.g. `client.chat`).
    Object(Arc<dyn Target>),
    /// A function or bound method.
    Function(Arc<dyn Callable>),
    /// A class.
    Class(Arc<dyn Constructor>),
}

impl Member {
    /// Whether the proxy should rewrap this member on access.
    pub fn is_wrappable(&self) -> bool {
        !matches!(self, Self::Value(_))
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Class(_) => f.write_str("Class(..)"),
        }
    }
}

/// The outcome of invoking a [`Callable`].
pub enum CallResult {
    /// The call has already produced its value.
    Ready(Resolved),
    /// The call is still running; awaiting yields the resolved value.
    Pending(BoxFuture<'static, TargetResult<Resolved>>),
}

/// A call result that is no longer pending.
pub enum Resolved {
    /// A single structured response.
    Value(Value),
    /// A stream of chunks pulled by blocking iteration.
    Iter(ChunkIter),
    /// A stream of chunks pulled by suspending iteration.
    Stream(ChunkStream),
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Iter(_) => f.write_str("Iter(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl<F> Callable for F
where
    F: Fn(Args, Kwargs) -> TargetResult<CallResult> + Send + Sync,
{
    fn call(&self, args: Args, kwargs: Kwargs) -> TargetResult<CallResult> {
        self(args, kwargs)
    }
}
