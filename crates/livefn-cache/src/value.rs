//! Type-tagged boxed values.

use std::any::{Any, TypeId};

use thiserror::Error;

/// Bound for anything stored in the cache.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

/// A value boxed together with its run-time type tag.
pub struct CachedValue {
    type_id: TypeId,
    type_name: &'static str,
    inner: Box<dyn Any + Send + Sync>,
}

/// A checked unboxing asked for a type the value was not stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected}, found {found}")]
pub struct TypeMismatch {
    /// Requested type.
    pub expected: &'static str,
    /// Stored type.
    pub found: &'static str,
}

impl CachedValue {
    /// Box `value`, recording its type.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            inner: Box::new(value),
        }
    }

    /// Name of the stored type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the stored type is `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Result<&T, TypeMismatch> {
        let mismatch = TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: self.type_name,
        };
        if !self.is::<T>() {
            return Err(mismatch);
        }
        self.inner.downcast_ref::<T>().ok_or(mismatch)
    }

    /// Mutably borrow the value as `T`.
    pub fn downcast_mut<T: Any>(&mut self) -> Result<&mut T, TypeMismatch> {
        let mismatch = TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: self.type_name,
        };
        if !self.is::<T>() {
            return Err(mismatch);
        }
        self.inner.downcast_mut::<T>().ok_or(mismatch)
    }
}

impl std::fmt::Debug for CachedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedValue")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_to_stored_type() {
        let value = CachedValue::new(42_i64);
        assert!(value.is::<i64>());
        assert_eq!(value.downcast_ref::<i64>(), Ok(&42));
    }

    #[test]
    fn downcast_to_other_type_is_mismatch() {
        let value = CachedValue::new(String::from("hi"));
        let err = value.downcast_ref::<i64>().unwrap_err();
        assert_eq!(err.expected, "i64");
        assert_eq!(err.found, "alloc::string::String");
        assert_eq!(value.downcast_ref::<String>().unwrap(), "hi");
    }

    #[test]
    fn downcast_mut_updates_in_place() {
        let mut value = CachedValue::new(vec![1_u8]);
        value.downcast_mut::<Vec<u8>>().unwrap().push(2);
        assert_eq!(value.downcast_ref::<Vec<u8>>().unwrap(), &vec![1, 2]);
        assert!(value.downcast_mut::<u8>().is_err());
    }

    #[test]
    fn debug_shows_type_only() {
        let value = CachedValue::new(7_u32);
        assert!(format!("{value:?}").contains("u32"));
    }
}
