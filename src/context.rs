//! Immutable evaluation contexts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::value::{FromValue, Value};

/// Name of the frame variable every [`Context::new`] carries.
pub const FRAME: &str = "frame";

#[derive(Default)]
struct ContextInner {
    variables: BTreeMap<Arc<str>, Value>,
    fingerprint: OnceLock<Fingerprint>,
}

/// An immutable, ordered set of named variables threaded through every hash and compute call.
///
/// Scoping is done by deriving: [`Context::with`] returns a modified copy and leaves `self`
/// untouched. Cloning is cheap. Two contexts with equal variables have equal fingerprints.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// A context holding only `frame = 1.0`.
    pub fn new() -> Self {
        Self::empty().with(FRAME, 1.0f32)
    }

    /// A context with no variables.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy of this context with `name` set to `value`.
    pub fn with(&self, name: &str, value: impl Into<Value>) -> Self {
        let mut variables = self.inner.variables.clone();
        variables.insert(Arc::from(name), value.into());
        Self::from_variables(variables)
    }

    /// Copy of this context without `name`. Returns a cheap clone if `name` is absent.
    pub fn without(&self, name: &str) -> Self {
        if !self.inner.variables.contains_key(name) {
            return self.clone();
        }
        let mut variables = self.inner.variables.clone();
        variables.remove(name);
        Self::from_variables(variables)
    }

    fn from_variables(variables: BTreeMap<Arc<str>, Value>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                variables,
                fingerprint: OnceLock::new(),
            }),
        }
    }

    /// Raw variable lookup.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.inner.variables.get(name)
    }

    /// Typed variable lookup. `None` if absent or of another type.
    pub fn get<T: FromValue>(&self, name: &str) -> Option<T> {
        self.get_value(name).and_then(T::from_value)
    }

    /// Returns true if `name` is set.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.variables.contains_key(name)
    }

    /// The current frame, or `0.0` if unset.
    pub fn frame(&self) -> f32 {
        self.get::<f32>(FRAME).unwrap_or(0.0)
    }

    /// Variable names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.variables.keys().map(|k| k.as_ref())
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.inner.variables.len()
    }

    /// Returns true if there are no variables.
    pub fn is_empty(&self) -> bool {
        self.inner.variables.is_empty()
    }

    /// Fingerprint of every variable name and value, computed once per context.
    pub fn fingerprint(&self) -> Fingerprint {
        *self.inner.fingerprint.get_or_init(|| {
            let mut hasher = FingerprintHasher::with_seed("Context");
            hasher.append_u64(self.inner.variables.len() as u64);
            for (name, value) in &self.inner.variables {
                hasher.append_str(name).append_str(value.value_type().name());
                value.hash_into(&mut hasher);
            }
            hasher.finish()
        })
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.variables == other.inner.variables
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.inner.variables.iter()).finish()
    }
}
