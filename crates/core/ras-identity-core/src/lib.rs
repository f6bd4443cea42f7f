//! Core session traits consumed by identity providers.
//!
//! Identity providers never own sessions. They receive a [`SessionHandle`] from
//! whatever framework owns the session and treat it as an addressable attribute
//! bag with a stable identifier.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Minimal capability interface of an application session.
///
/// Implementations use interior mutability; every method takes `&self` so a
/// handle can be shared between the request that started a login and the
/// request that completes it.
pub trait Session: Send + Sync {
    /// Stable identifier of the session.
    fn id(&self) -> String;

    /// Set (or replace) an attribute.
    fn set_attr(&self, key: &str, value: serde_json::Value);

    /// Read an attribute.
    fn attr(&self, key: &str) -> Option<serde_json::Value>;

    /// Remove an attribute, returning its previous value.
    fn remove_attr(&self, key: &str) -> Option<serde_json::Value>;
}

/// Shared reference to a session owned elsewhere.
pub type SessionHandle = Arc<dyn Session>;

/// Hook invoked synchronously once a session has been authenticated.
pub type PostAuthHook = Arc<dyn Fn(&SessionHandle) + Send + Sync>;

/// Typed helpers on top of the JSON attribute bag.
pub trait SessionExt {
    /// Serialize `value` into the attribute `key`. Returns false if the value
    /// could not be represented as JSON.
    fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> bool;

    /// Deserialize attribute `key`, if present and of the expected shape.
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T>;
}

impl<S: Session + ?Sized> SessionExt for S {
    fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => {
                self.set_attr(key, json);
                true
            }
            Err(_) => false,
        }
    }

    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attr(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }
}
