//! Typed metadata keys.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

/// Names a value attached with [`Context::with_value`](super::Context::with_value).
///
/// Keys match by name and value type, so a `ContextKey<u32>` named
/// `"request_id"` never finds a `String` stored under the same name.
///
/// ```
/// use strand::context::{self, ContextKey};
///
/// static REQUEST_ID: ContextKey<u64> = ContextKey::new("request_id");
///
/// let ctx = context::background().with_value(&REQUEST_ID, 7);
/// assert_eq!(ctx.value(&REQUEST_ID).as_deref(), Some(&7));
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Creates a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    /// The key's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> ContextKey<T> {
    pub(crate) fn id(&self) -> KeyId {
        KeyId {
            name: self.name,
            ty: TypeId::of::<T>(),
        }
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeyId {
    name: &'static str,
    ty: TypeId,
}
