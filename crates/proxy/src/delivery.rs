//! What the caller receives from an intercepted call.

/// A value handed back to the caller, bare or paired with a correlation id.
///
/// `Correlated` is used whenever the caller asked for the id, even when the
/// sink returned none (the id is then `None`).
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    Bare(T),
    Correlated(T, Option<String>),
}

impl<T> Delivery<T> {
    pub(crate) fn new(value: T, correlated: bool, id: Option<String>) -> Self {
        if correlated {
            Self::Correlated(value, id)
        } else {
            Self::Bare(value)
        }
    }

    /// Borrow the delivered value.
    pub fn value(&self) -> &T {
        match self {
            Self::Bare(v) | Self::Correlated(v, _) => v,
        }
    }

    /// Drop the correlation id, if any.
    pub fn into_inner(self) -> T {
        match self {
            Self::Bare(v) | Self::Correlated(v, _) => v,
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Correlated(_, id) => id.as_deref(),
            Self::Bare(_) => None,
        }
    }

    pub fn is_correlated(&self) -> bool {
        matches!(self, Self::Correlated(..))
    }

    pub fn into_parts(self) -> (T, Option<String>) {
        match self {
            Self::Bare(v) => (v, None),
            Self::Correlated(v, id) => (v, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_unless_correlated() {
        let d = Delivery::new(1, false, Some("ignored".into()));
        assert_eq!(d, Delivery::Bare(1));
        assert!(d.correlation_id().is_none());

        let d = Delivery::new(1, true, None);
        assert!(d.is_correlated());
        assert_eq!(d.into_parts(), (1, None));
    }
}
