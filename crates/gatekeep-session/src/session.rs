//! Per-request session state.

use serde_json::{Map, Value};

/// A session as seen by one request.
///
/// Values are a flat JSON object. Any mutation through [`Session::insert`] or
/// [`Session::remove`] marks the session dirty so the caller knows to save it.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: Option<String>,
    name: String,
    pub(crate) values: Map<String, Value>,
    max_age: i64,
    pub(crate) is_new: bool,
    dirty: bool,
}

impl Session {
    /// A fresh session with no ID yet.
    pub fn new(name: impl Into<String>, max_age: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            values: Map::new(),
            max_age,
            is_new: true,
            dirty: false,
        }
    }

    pub(crate) fn loaded(
        name: impl Into<String>,
        id: String,
        values: Map<String, Value>,
        max_age: i64,
    ) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            values,
            max_age,
            is_new: false,
            dirty: false,
        }
    }

    /// Session ID, assigned on first save.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when no stored record backed this session at load time.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value for `key`. Empty strings count as absent.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Flag the session for saving without changing a value.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Cookie max-age in seconds. Negative means delete on save.
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    /// Expire the session: the next save deletes the record and clears the cookie.
    pub fn expire(&mut self) {
        self.max_age = -1;
        self.dirty = true;
    }
}
