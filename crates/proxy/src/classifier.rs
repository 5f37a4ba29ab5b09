//! Response classification: one value, or a stream of chunks.

use calltrace_core::{ChunkIter, ChunkStream, ProviderError, Resolved};
use serde_json::Value;

/// The `object` tag of an OpenAI streaming chunk.
const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// How an already-resolved call result is delivered.
pub enum Classified {
    /// A single value, emitted as-is.
    Immediate(Value),
    /// Chunks pulled by blocking iteration.
    Blocking(ChunkIter),
    /// Chunks pulled by suspending iteration.
    Suspending(ChunkStream),
}

impl Classified {
    pub fn is_incremental(&self) -> bool {
        !matches!(self, Self::Immediate(_))
    }
}

/// Classify a resolved call result.
///
/// Iterators and streams are incremental. A plain value is immediate unless
/// it is a buffered chunk sequence (a non-empty array of streaming chunks),
/// which is replayed as a blocking stream.
pub fn classify(resolved: Resolved) -> Classified {
    match resolved {
        Resolved::Iter(iter) => Classified::Blocking(iter),
        Resolved::Stream(stream) => Classified::Suspending(stream),
        Resolved::Value(value) if is_buffered_stream(&value) => match value {
            Value::Array(chunks) => {
                Classified::Blocking(Box::new(chunks.into_iter().map(Ok::<_, ProviderError>)))
            }
            other => Classified::Immediate(other),
        },
        Resolved::Value(value) => Classified::Immediate(value),
    }
}

/// Whether `value` is a buffered sequence of streaming chunks.
pub fn is_buffered_stream(value: &Value) -> bool {
    match value.as_array() {
        Some(items) if !items.is_empty() => items
            .iter()
            .all(|item| item.get("object").and_then(Value::as_str) == Some(CHUNK_OBJECT)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    #[test]
    fn plain_values_are_immediate() {
        let c = classify(Resolved::Value(json!({"object": "chat.completion"})));
        assert!(matches!(c, Classified::Immediate(_)));
        assert!(!classify(Resolved::Value(json!([]))).is_incremental());
        assert!(!classify(Resolved::Value(json!([1, 2]))).is_incremental());
    }

    #[test]
    fn iterators_and_streams_are_incremental() {
        let iter: ChunkIter = Box::new(std::iter::empty());
        assert!(matches!(classify(Resolved::Iter(iter)), Classified::Blocking(_)));

        let s: ChunkStream = Box::pin(stream::empty());
        assert!(matches!(classify(Resolved::Stream(s)), Classified::Suspending(_)));
    }

    #[test]
    fn buffered_chunks_replay_in_order() {
        let value = json!([
            {"object": "chat.completion.chunk", "n": 1},
            {"object": "chat.completion.chunk", "n": 2}
        ]);
        let Classified::Blocking(iter) = classify(Resolved::Value(value)) else {
            panic!("expected a blocking stream");
        };
        let ns: Vec<_> = iter.map(|c| c.unwrap()["n"].clone()).collect();
        assert_eq!(ns, vec![json!(1), json!(2)]);
    }

    #[test]
    fn mixed_arrays_are_not_streams() {
        let value = json!([{"object": "chat.completion.chunk"}, {"object": "list"}]);
        assert!(!is_buffered_stream(&value));
    }
}
