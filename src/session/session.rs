//! The request-scoped session value.

use std::collections::{BTreeMap, HashMap};

use bitflags::bitflags;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::session::SessionError;

/// Attribute holding the KV session ID of a restored session.
pub const SESSION_ID_ATTR: &str = "__session_id";
/// Attribute holding the comma-separated cookie names a session was read from.
pub const COOKIE_NAMES_ATTR: &str = "__cookie_names";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionFlags: u8 {
        /// Nothing was loaded; the session starts empty.
        const NEW = 1 << 0;
        /// Loaded from a store.
        const RESTORED = 1 << 1;
        /// `data` changed since load.
        const UPDATED = 1 << 2;
        /// Erase on save.
        const DELETE = 1 << 3;
        /// Mint a new session ID on save.
        const REFRESH = 1 << 4;
    }
}

/// Wire format for session data and the values stored in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    /// bincode
    #[default]
    Binary,
    Json,
}

impl Serialization {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SessionError> {
        match self {
            Serialization::Binary => bincode::serialize(value).map_err(|e| SessionError::Serialization(e.to_string())),
            Serialization::Json => serde_json::to_vec(value).map_err(|e| SessionError::Serialization(e.to_string())),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SessionError> {
        match self {
            Serialization::Binary => bincode::deserialize(bytes).map_err(|e| SessionError::Serialization(e.to_string())),
            Serialization::Json => serde_json::from_slice(bytes).map_err(|e| SessionError::Serialization(e.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    flags: SessionFlags,
    attrs: HashMap<String, String>,
    data: BTreeMap<String, Vec<u8>>,
    raw: Option<Vec<u8>>,
    method: Serialization,
}

impl Session {
    /// An empty session flagged `NEW`.
    pub fn new(method: Serialization) -> Self {
        Self {
            flags: SessionFlags::NEW,
            attrs: HashMap::new(),
            data: BTreeMap::new(),
            raw: None,
            method,
        }
    }

    /// Rebuild a session from its serialized form, flagged `RESTORED`.
    pub fn restore(raw: Vec<u8>, method: Serialization) -> Result<Self, SessionError> {
        let data = method.decode(&raw)?;
        Ok(Self {
            flags: SessionFlags::RESTORED,
            attrs: HashMap::new(),
            data,
            raw: Some(raw),
            method,
        })
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn has_flag(&self, flag: SessionFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: SessionFlags) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: SessionFlags) {
        self.flags.remove(flag);
    }

    pub fn serialization(&self) -> Serialization {
        self.method
    }

    /// Transient per-request annotation. Never persisted.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Store `value` under `key`. Marks the session `UPDATED` when the stored
    /// bytes change.
    pub fn persist<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), SessionError> {
        let bytes = self.method.encode(value)?;
        if self.data.get(key) != Some(&bytes) {
            self.data.insert(key.to_string(), bytes);
            self.flags.insert(SessionFlags::UPDATED);
        }
        Ok(())
    }

    /// Read the value under `key`, if any.
    pub fn extract<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.data.get(key).map(|bytes| self.method.decode(bytes)).transpose()
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.data.remove(key).is_some();
        if removed {
            self.flags.insert(SessionFlags::UPDATED);
        }
        removed
    }

    /// Drop all data and erase the session from its store on save.
    pub fn invalidate(&mut self) {
        if !self.data.is_empty() {
            self.data.clear();
            self.flags.insert(SessionFlags::UPDATED);
        }
        self.flags.insert(SessionFlags::DELETE);
    }

    /// Keep the data but issue a new session ID on save.
    pub fn refresh(&mut self) {
        self.flags.insert(SessionFlags::REFRESH);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.data
    }

    /// Serialized form. An unchanged restored session yields its original bytes.
    pub fn marshal_binary(&self) -> Result<Vec<u8>, SessionError> {
        match &self.raw {
            Some(raw) if !self.flags.contains(SessionFlags::UPDATED) => Ok(raw.clone()),
            _ => self.method.encode(&self.data),
        }
    }
}
