//! Typed side-channel values for exchanges and connections.
//!
//! A [`Scope`] maps [`ScopeKey`]s to values of the key's type. Clones share
//! the same map, so a scope handed to a request action and kept by the
//! caller observes the same updates.
//!
//! ```ignore
//! let scope = Scope::new();
//! scope.set(&LAST_EXCHANGE, true);
//! assert!(scope.get(&LAST_EXCHANGE));
//! ```

use crate::http::h1::headers::HttpHeaders;
use crate::http::h1::types::Version;
use crate::promise::{Promise, Resolver};
use crate::Error;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

/// Supplies trailers when a chunked body is closed.
pub type TrailersProvider = Arc<dyn Fn() -> Promise<Option<HttpHeaders>> + Send + Sync>;

/// A typed key. Keys with equal names and types address the same slot.
pub struct ScopeKey<T> {
    name: &'static str,
    default: Option<fn() -> T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScopeKey<T> {
    /// A key without a default value.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            default: None,
            _marker: PhantomData,
        }
    }

    /// A key whose lookups fall back to `default()` when unset.
    #[must_use]
    pub const fn with_default(name: &'static str, default: fn() -> T) -> Self {
        Self {
            name,
            default: Some(default),
            _marker: PhantomData,
        }
    }

    /// The key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for ScopeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopeKey").field(&self.name).finish()
    }
}

type Slot = (&'static str, TypeId);

/// A shared, thread-safe, heterogeneous map.
#[derive(Clone, Default)]
pub struct Scope {
    values: Arc<Mutex<HashMap<Slot, Box<dyn Any + Send + Sync>>>>,
}

fn slot<T: 'static>(key: &ScopeKey<T>) -> Slot {
    (key.name, TypeId::of::<T>())
}

impl Scope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored value, else the key default.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &ScopeKey<T>) -> Option<T> {
        let stored = self
            .values
            .lock()
            .get(&slot(key))
            .and_then(|v| v.downcast_ref::<T>())
            .cloned();
        stored.or_else(|| key.default.map(|default| default()))
    }

    /// The stored value or the key default, falling back to `T::default()`.
    #[must_use]
    pub fn get_or_default<T: Clone + Default + Send + Sync + 'static>(
        &self,
        key: &ScopeKey<T>,
    ) -> T {
        self.get(key).unwrap_or_default()
    }

    /// Stores `value`, returning the previous one.
    pub fn set<T: Send + Sync + 'static>(&self, key: &ScopeKey<T>, value: T) -> Option<T> {
        self.values
            .lock()
            .insert(slot(key), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Removes and returns the stored value.
    pub fn remove<T: Send + Sync + 'static>(&self, key: &ScopeKey<T>) -> Option<T> {
        self.values
            .lock()
            .remove(&slot(key))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns true if a value is stored for `key`.
    #[must_use]
    pub fn contains<T: 'static>(&self, key: &ScopeKey<T>) -> bool {
        self.values.lock().contains_key(&slot(key))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.lock();
        let mut names: Vec<_> = values.keys().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("Scope").field("keys", &names).finish()
    }
}

/// Marks the exchange as the last one on its connection.
pub const LAST_EXCHANGE: ScopeKey<bool> = ScopeKey::with_default("lastExchange", || false);

/// Protocol version the client writes; HTTP/1.1 when unset.
pub const FORCE_VERSION: ScopeKey<Version> = ScopeKey::new("forceVersion");

/// Names announced by the `Trailer` header of a chunked response.
pub const TRAILERS_NAMES: ScopeKey<Vec<String>> = ScopeKey::new("trailersNames");

/// Trailers written when a chunked body is closed.
pub const TRAILERS_PROVIDER: ScopeKey<TrailersProvider> = ScopeKey::new("trailersProvider");

/// Resolved when the server answers `Expect: 100-continue`.
pub const CONTINUE_LISTENER: ScopeKey<Resolver<()>> = ScopeKey::new("continueListener");

/// Connection target used instead of the request URI host (e.g. for proxies).
pub const CONNECTION_HOST: ScopeKey<String> = ScopeKey::new("connectionHost");

/// The failure passed to the bad request handler.
pub const BAD_REQUEST_PROBLEM: ScopeKey<Error> = ScopeKey::new("badRequestProblem");

/// Skips writing the status line when switching protocols.
pub const SWITCH_NO_REPLY: ScopeKey<bool> = ScopeKey::with_default("switchNoReply", || false);

/// Address the server socket is bound to.
pub const SERVER_ADDRESS: ScopeKey<SocketAddr> = ScopeKey::new("serverAddress");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_typed_and_shared() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("values_are_typed_and_shared");
        let scope = Scope::new();
        let view = scope.clone();
        assert!(!scope.get_or_default(&LAST_EXCHANGE));
        assert!(!scope.contains(&LAST_EXCHANGE));
        scope.set(&LAST_EXCHANGE, true);
        assert_eq!(view.get(&LAST_EXCHANGE), Some(true));
        assert_eq!(view.get(&FORCE_VERSION), None);
        scope.set(&CONNECTION_HOST, "proxy:3128".to_owned());
        assert_eq!(view.remove(&CONNECTION_HOST).as_deref(), Some("proxy:3128"));
        assert!(scope.get(&CONNECTION_HOST).is_none());
        crate::test_complete!("values_are_typed_and_shared");
    }
}
