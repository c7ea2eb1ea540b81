//! Typed data attached to a socket for its whole lifetime.
//!
//! It is a thread safe wrapper around [`http::Extensions`]. Values are cloned
//! out of the map, so wrap expensive ones in an [`Arc`](std::sync::Arc).
use std::sync::RwLock;

/// A type map shared by the handlers of a socket.
#[derive(Debug, Default)]
pub struct Extensions {
    map: RwLock<http::Extensions>,
}

impl Extensions {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, val: T) -> Option<T> {
        self.map.write().unwrap().insert(val)
    }

    /// Get a clone of the value of type `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map.read().unwrap().get::<T>().cloned()
    }

    /// Remove the value of type `T`.
    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.map.write().unwrap().remove::<T>()
    }

    /// Returns true if a value of type `T` is present.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.read().unwrap().get::<T>().is_some()
    }

    /// Remove every value.
    pub fn clear(&self) {
        self.map.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct User(String);

    #[test]
    fn insert_get_remove() {
        let ext = Extensions::new();
        assert_eq!(ext.insert(User("a".into())), None);
        assert_eq!(ext.insert(User("b".into())), Some(User("a".into())));
        assert_eq!(ext.get::<User>(), Some(User("b".into())));
        assert!(ext.contains::<User>());
        assert_eq!(ext.remove::<User>(), Some(User("b".into())));
        assert_eq!(ext.get::<User>(), None);
    }

    #[test]
    fn values_are_keyed_by_type() {
        let ext = Extensions::new();
        ext.insert(1u32);
        ext.insert("name");
        assert_eq!(ext.get::<u32>(), Some(1));
        assert_eq!(ext.get::<&str>(), Some("name"));
        ext.clear();
        assert!(!ext.contains::<u32>());
    }
}
