//! The intercepting proxy.
//!
//! A proxy wraps one node of a client's object graph: an object, a function
//! or a class. Reading a member of a wrapped object returns a new proxy over
//! that member, with the dotted path extended by the member name, so
//! `openai.chat.completions.create` ends up instrumented without the caller
//! doing anything special.
//!
//! Calling a wrapped function opens a [`CallEnvelope`], forwards the call
//! with the reserved controls removed, and routes the result:
//!
//! | result                    | returned as              | emission            |
//! |---------------------------|--------------------------|---------------------|
//! | ready value               | `Response::Immediate`    | before returning    |
//! | ready iterator / stream   | a reassembler            | on the terminal chunk |
//! | pending computation       | `Intercepted::Pending`   | after it resolves   |
//!
//! Calling a wrapped class constructs the instance and wraps it under the
//! same path. Construction is not a tracked call.

use crate::classifier::{Classified, classify};
use crate::delivery::Delivery;
use crate::finish::Telemetry;
use crate::reassembler::{BlockingReassembler, SuspendingReassembler};
use calltrace_config::ProxySettings;
use calltrace_core::{
    ArgValue, Args, CallEnvelope, CallResult, Callable, CallerError, Constructor, Error, Kwargs,
    Member, ProviderKind, Resolved, Result, Target,
};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Reserved keyword carrying the caller's tags.
pub const TAGS_KEY: &str = "pl_tags";

/// Reserved keyword asking for the correlation id.
pub const RETURN_ID_KEY: &str = "return_pl_id";

#[derive(Clone)]
enum Node {
    Object(Arc<dyn Target>),
    Function(Arc<dyn Callable>),
    Class(Arc<dyn Constructor>),
}

impl Node {
    fn from_member(member: Member) -> Option<Self> {
        match member {
            Member::Object(t) => Some(Self::Object(t)),
            Member::Function(f) => Some(Self::Function(f)),
            Member::Class(c) => Some(Self::Class(c)),
            Member::Value(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Class(_) => "class",
        }
    }
}

/// A transparent, instrumenting wrapper around a client object.
#[derive(Clone)]
pub struct InterceptingProxy {
    node: Node,
    path: String,
    provider: ProviderKind,
    exempt: Arc<[String]>,
    telemetry: Arc<Telemetry>,
}

/// The result of reading a member through the proxy.
#[derive(Debug)]
pub enum Accessed {
    /// A wrappable member, rewrapped.
    Proxy(InterceptingProxy),
    /// A plain value or an exempt member, untouched.
    Raw(Member),
}

impl Accessed {
    pub fn into_proxy(self) -> Option<InterceptingProxy> {
        match self {
            Self::Proxy(p) => Some(p),
            Self::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<Member> {
        match self {
            Self::Raw(m) => Some(m),
            Self::Proxy(_) => None,
        }
    }
}

/// The result of invoking the proxy.
pub enum Intercepted {
    /// A class was called; this proxies the new instance.
    Instance(InterceptingProxy),
    /// The wrapped call had already resolved.
    Ready(Response),
    /// The wrapped call is still running. The future resolves once it has
    /// and the result has been routed.
    Pending(BoxFuture<'static, Result<Response>>),
}

impl Intercepted {
    pub fn into_instance(self) -> Option<InterceptingProxy> {
        match self {
            Self::Instance(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_ready(self) -> Option<Response> {
        match self {
            Self::Ready(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_pending(self) -> Option<BoxFuture<'static, Result<Response>>> {
        match self {
            Self::Pending(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// A routed call result.
pub enum Response {
    /// A single value; telemetry has already been dispatched.
    Immediate(Delivery<Value>),
    /// Chunks pulled by blocking iteration.
    Blocking(BlockingReassembler),
    /// Chunks pulled by suspending iteration.
    Suspending(SuspendingReassembler),
}

impl Response {
    pub fn into_immediate(self) -> Option<Delivery<Value>> {
        match self {
            Self::Immediate(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_blocking(self) -> Option<BlockingReassembler> {
        match self {
            Self::Blocking(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_suspending(self) -> Option<SuspendingReassembler> {
        match self {
            Self::Suspending(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Debug for Intercepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(p) => f.debug_tuple("Instance").field(p).finish(),
            Self::Ready(r) => f.debug_tuple("Ready").field(r).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(d) => f.debug_tuple("Immediate").field(d).finish(),
            Self::Blocking(_) => f.write_str("Blocking(..)"),
            Self::Suspending(_) => f.write_str("Suspending(..)"),
        }
    }
}

impl InterceptingProxy {
    /// Wrap a client object under `settings.root_name`.
    pub fn wrap(target: Arc<dyn Target>, settings: &ProxySettings, telemetry: Arc<Telemetry>) -> Self {
        Self {
            node: Node::Object(target),
            path: settings.root_name.clone(),
            provider: settings.provider.clone(),
            exempt: settings.exempt.clone().into(),
            telemetry,
        }
    }

    /// Dotted path of the wrapped node.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn provider(&self) -> &ProviderKind {
        &self.provider
    }

    fn child(&self, name: &str, node: Node) -> Self {
        let path = if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path, name)
        };
        Self {
            node,
            path,
            provider: self.provider.clone(),
            exempt: Arc::clone(&self.exempt),
            telemetry: Arc::clone(&self.telemetry),
        }
    }

    fn rebind(&self, node: Node) -> Self {
        Self {
            node,
            ..self.clone()
        }
    }

    fn object(&self) -> Result<&Arc<dyn Target>> {
        match &self.node {
            Node::Object(target) => Ok(target),
            _ => Err(CallerError::NoMembers(self.path.clone()).into()),
        }
    }

    /// Read a member, rewrapping anything callable or nested.
    pub fn get(&self, name: &str) -> Result<Accessed> {
        let member = self.object()?.get(name)?;

        if self.exempt.iter().any(|e| e == name) {
            return Ok(Accessed::Raw(member));
        }

        Ok(match Node::from_member(member.clone()) {
            Some(node) => Accessed::Proxy(self.child(name, node)),
            None => Accessed::Raw(member),
        })
    }

    /// Shorthand for a chain of `get`s that must all yield proxies.
    pub fn path_to(&self, names: &[&str]) -> Result<Self> {
        let mut current = self.clone();
        for name in names {
            current = match current.get(name)? {
                Accessed::Proxy(p) => p,
                Accessed::Raw(_) => {
                    return Err(CallerError::NoMembers(format!("{}.{}", current.path, name)).into());
                }
            };
        }
        Ok(current)
    }

    /// Write a member on the wrapped object. Not intercepted.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        Ok(self.object()?.set(name, value)?)
    }

    /// Delete a member on the wrapped object. Not intercepted.
    pub fn delete(&self, name: &str) -> Result<()> {
        Ok(self.object()?.delete(name)?)
    }

    /// Invoke the wrapped function or class.
    ///
    /// `pl_tags` and `return_pl_id` are removed from `kwargs` and validated
    /// before anything is called. Errors raised by the wrapped call are
    /// returned unchanged.
    pub fn call(&self, args: Args, kwargs: Kwargs) -> Result<Intercepted> {
        let (controls, kwargs) = Controls::extract(kwargs)?;

        let function = match &self.node {
            Node::Object(_) => return Err(CallerError::NotCallable(self.path.clone()).into()),
            Node::Class(class) => {
                let instance = class.construct(args, kwargs)?;
                debug!(path = %self.path, "Wrapped constructed instance");
                return Ok(Intercepted::Instance(self.rebind(Node::Object(instance))));
            }
            Node::Function(function) => Arc::clone(function),
        };

        let mut envelope = CallEnvelope::open(
            self.path.clone(),
            self.provider.clone(),
            args.clone(),
            kwargs.clone(),
        )
        .with_tags(controls.tags)
        .with_correlation_id(controls.return_id);

        debug!(
            path = %self.path,
            call_id = %envelope.id,
            node = self.node.kind(),
            "Intercepted call"
        );

        match Callable::call(function.as_ref(), args, kwargs)? {
            CallResult::Ready(resolved) => {
                envelope.mark_ended();
                Ok(Intercepted::Ready(route_blocking(
                    &self.telemetry,
                    envelope,
                    resolved,
                )))
            }
            CallResult::Pending(pending) => {
                let telemetry = Arc::clone(&self.telemetry);
                Ok(Intercepted::Pending(Box::pin(async move {
                    let resolved = pending.await?;
                    envelope.mark_ended();
                    Ok::<_, Error>(route_suspending(telemetry, envelope, resolved).await)
                })))
            }
        }
    }
}

impl fmt::Debug for InterceptingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingProxy")
            .field("path", &self.path)
            .field("node", &self.node.kind())
            .field("provider", &self.provider)
            .finish()
    }
}

/// Route a result produced on the caller's thread. Immediate values are
/// emitted before returning.
fn route_blocking(telemetry: &Arc<Telemetry>, envelope: CallEnvelope, resolved: Resolved) -> Response {
    let wants_id = envelope.return_correlation_id;
    match classify(resolved) {
        Classified::Immediate(value) => {
            let id = telemetry.finish(envelope, value.clone());
            Response::Immediate(Delivery::new(value, wants_id, id))
        }
        Classified::Blocking(iter) => {
            Response::Blocking(BlockingReassembler::new(iter, envelope, Arc::clone(telemetry)))
        }
        Classified::Suspending(stream) => {
            Response::Suspending(SuspendingReassembler::new(stream, envelope, Arc::clone(telemetry)))
        }
    }
}

/// Route a result produced by a pending computation. Immediate values are
/// emitted off the executor; the emission is awaited only when the caller
/// wants the correlation id.
async fn route_suspending(
    telemetry: Arc<Telemetry>,
    envelope: CallEnvelope,
    resolved: Resolved,
) -> Response {
    let wants_id = envelope.return_correlation_id;
    match classify(resolved) {
        Classified::Immediate(value) if wants_id => {
            let id = telemetry.finish_offloaded(envelope, value.clone()).await;
            Response::Immediate(Delivery::new(value, true, id))
        }
        Classified::Immediate(value) => {
            telemetry.finish_detached(envelope, value.clone());
            Response::Immediate(Delivery::Bare(value))
        }
        Classified::Blocking(iter) => {
            Response::Blocking(BlockingReassembler::new(iter, envelope, telemetry))
        }
        Classified::Suspending(stream) => {
            Response::Suspending(SuspendingReassembler::new(stream, envelope, telemetry))
        }
    }
}

/// The reserved keyword controls of one call.
#[derive(Debug, Default, PartialEq)]
struct Controls {
    tags: Option<Vec<String>>,
    return_id: bool,
}

impl Controls {
    /// Remove and validate the reserved keys. `null` counts as absent.
    fn extract(mut kwargs: Kwargs) -> std::result::Result<(Self, Kwargs), CallerError> {
        let tags = match kwargs.remove(TAGS_KEY) {
            None | Some(ArgValue::Json(Value::Null)) => None,
            Some(ArgValue::Json(Value::Array(items))) => Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(tag) => Ok(tag),
                        other => Err(CallerError::InvalidTags(format!(
                            "a list containing {}",
                            ArgValue::Json(other).kind()
                        ))),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            ),
            Some(other) => return Err(CallerError::InvalidTags(other.kind().to_string())),
        };

        let return_id = match kwargs.remove(RETURN_ID_KEY) {
            None | Some(ArgValue::Json(Value::Null)) => false,
            Some(ArgValue::Json(Value::Bool(flag))) => flag,
            Some(other) => {
                return Err(CallerError::InvalidFlag {
                    key: RETURN_ID_KEY.to_string(),
                    found: other.kind().to_string(),
                });
            }
        };

        Ok((Self { tags, return_id }, kwargs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(pairs: Vec<(&str, ArgValue)>) -> Kwargs {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn controls_are_removed() {
        let (controls, rest) = Controls::extract(kwargs(vec![
            ("model", "gpt-4o".into()),
            (TAGS_KEY, vec!["a".to_string(), "b".to_string()].into()),
            (RETURN_ID_KEY, true.into()),
        ]))
        .unwrap();

        assert_eq!(controls.tags, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(controls.return_id);
        assert_eq!(rest.len(), 1);
        assert!(rest.contains_key("model"));
    }

    #[test]
    fn null_controls_count_as_absent() {
        let (controls, rest) = Controls::extract(kwargs(vec![
            (TAGS_KEY, Value::Null.into()),
            (RETURN_ID_KEY, Value::Null.into()),
        ]))
        .unwrap();
        assert_eq!(controls, Controls::default());
        assert!(rest.is_empty());
    }

    #[test]
    fn a_single_string_is_not_a_tag_list() {
        let err = Controls::extract(kwargs(vec![(TAGS_KEY, "prod".into())])).unwrap_err();
        assert_eq!(err, CallerError::InvalidTags("a string".into()));
    }

    #[test]
    fn tag_lists_must_hold_strings() {
        let err = Controls::extract(kwargs(vec![(TAGS_KEY, json!(["ok", 3]).into())])).unwrap_err();
        assert!(matches!(err, CallerError::InvalidTags(msg) if msg.contains("a number")));
    }

    #[test]
    fn correlation_flag_must_be_boolean() {
        let err = Controls::extract(kwargs(vec![(RETURN_ID_KEY, "yes".into())])).unwrap_err();
        assert!(matches!(err, CallerError::InvalidFlag { key, .. } if key == RETURN_ID_KEY));
    }
}
