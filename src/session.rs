//! Session collaborator contract.
//!
//! The engine does not own session persistence. It asks the configured
//! [`SessionManager`] for a session during prepare (only when the manager is
//! stateful) and, during finalize, hands back a modified session so the
//! manager can store it and produce a `Set-Cookie` value.

use std::collections::HashMap;

use http::HeaderValue;
use parking_lot::Mutex;
use serde_json::Value;

use crate::request::Request;

/// A request's session: an id plus string-keyed values.
#[derive(Clone, Debug)]
pub struct Session {
    id: String,
    values: HashMap<String, Value>,
    is_new: bool,
    modified: bool,
}

impl Session {
    /// A fresh session with a random id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            values: HashMap::new(),
            is_new: true,
            modified: false,
        }
    }

    /// A session restored from a store.
    pub fn restore(id: impl Into<String>, values: HashMap<String, Value>) -> Self {
        Self { id: id.into(), values, is_new: false, modified: false }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn is_new(&self) -> bool { self.is_new }
    pub fn is_modified(&self) -> bool { self.modified }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.modified = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.values.remove(key);
        self.modified |= old.is_some();
        old
    }

    pub fn values(&self) -> &HashMap<String, Value> { &self.values }
}

impl Default for Session {
    fn default() -> Self { Self::new() }
}

/// Supplies and persists sessions for the engine.
pub trait SessionManager: Send + Sync + 'static {
    /// Stateless managers are never consulted by the engine.
    fn is_stateful(&self) -> bool;

    /// Looks up the session referenced by the request, if any.
    fn load(&self, req: &Request) -> Option<Session>;

    /// Persists `session` and returns the `Set-Cookie` value to emit.
    fn save(&self, session: &Session) -> Option<HeaderValue>;
}

/// In-process session manager keyed by a cookie.
pub struct MemorySessionManager {
    cookie_name: String,
    store: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemorySessionManager {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self { cookie_name: cookie_name.into(), store: Mutex::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cookie_value<'r>(&self, req: &'r Request) -> Option<&'r str> {
        req.headers()
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)
    }
}

impl SessionManager for MemorySessionManager {
    fn is_stateful(&self) -> bool { true }

    fn load(&self, req: &Request) -> Option<Session> {
        let id = self.cookie_value(req)?;
        let values = self.store.lock().get(id).cloned()?;
        Some(Session::restore(id, values))
    }

    fn save(&self, session: &Session) -> Option<HeaderValue> {
        self.store.lock().insert(session.id.clone(), session.values.clone());
        let cookie = format!("{}={}; Path=/; HttpOnly", self.cookie_name, session.id);
        HeaderValue::try_from(cookie).ok()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn set_marks_session_modified() {
        let mut s = Session::new();
        assert!(s.is_new());
        assert!(!s.is_modified());
        s.set("test1", "test1value");
        assert!(s.is_modified());
        assert_eq!(s.get_str("test1"), Some("test1value"));
        assert!(s.remove("missing").is_none());
    }

    #[test]
    fn memory_manager_round_trips_through_cookie() {
        let manager = MemorySessionManager::new("keel_session");
        let mut s = Session::new();
        s.set("user", "alice");
        let cookie = manager.save(&s).unwrap();
        assert!(cookie.to_str().unwrap().starts_with(&format!("keel_session={}", s.id())));

        let (parts, ()) = http::Request::builder()
            .uri("/")
            .header("cookie", format!("theme=dark; keel_session={}", s.id()))
            .body(())
            .unwrap()
            .into_parts();
        let mut req = Request::new();
        req.populate(parts, Bytes::new());

        let loaded = manager.load(&req).unwrap();
        assert_eq!(loaded.id(), s.id());
        assert!(!loaded.is_new());
        assert_eq!(loaded.get_str("user"), Some("alice"));
    }

    #[test]
    fn unknown_cookie_yields_no_session() {
        let manager = MemorySessionManager::new("keel_session");
        let (parts, ()) = http::Request::builder()
            .header("cookie", "keel_session=nope")
            .body(())
            .unwrap()
            .into_parts();
        let mut req = Request::new();
        req.populate(parts, Bytes::new());
        assert!(manager.load(&req).is_none());
        assert!(manager.is_empty());
    }
}
