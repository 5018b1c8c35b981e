//! Per-run shared state.
//!
//! A [`RunState`] is a map of named fields. Fields are single-typed: once a
//! field holds a non-null value, it only accepts values of the same kind.
//! [`SharedState`] is the handle steps receive; writers take an exclusive
//! lock, so concurrently running steps never interleave mutations.

use crate::{StateError, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    fields: HashMap<String, Value>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into().normalized());
        self
    }

    /// Build a state from a serializable model. Its top-level fields become
    /// state fields.
    pub fn from_serializable<T: Serialize>(model: &T) -> Result<Self, StateError> {
        let json = serde_json::to_value(model).map_err(|e| StateError::Conversion {
            field: "<root>".to_string(),
            message: e.to_string(),
        })?;
        match Value::from_json(json) {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(StateError::Conversion {
                field: "<root>".to_string(),
                message: format!("expected an object, got {}", other.kind()),
            }),
        }
    }

    /// Deserialize the whole state into a typed model.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, StateError> {
        serde_json::from_value(self.to_json()).map_err(|e| StateError::Conversion {
            field: "<root>".to_string(),
            message: e.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Value, StateError> {
        self.fields
            .get(name)
            .ok_or_else(|| StateError::MissingField(name.to_string()))
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, StateError> {
        let value = self.require(name)?;
        serde_json::from_value(value.to_json()).map_err(|e| StateError::Conversion {
            field: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Store a value, returning the previous one.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, StateError> {
        let name = name.into();
        let value = value.into().normalized();
        if let Some(existing) = self.fields.get(&name) {
            if !existing.is_null() && !value.is_null() && existing.kind() != value.kind() {
                return Err(StateError::TypeMismatch {
                    field: name,
                    expected: existing.kind().to_string(),
                    actual: value.kind().to_string(),
                });
            }
        }
        Ok(self.fields.insert(name, value))
    }

    pub fn set_as<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        model: &T,
    ) -> Result<Option<Value>, StateError> {
        let name = name.into();
        let json = serde_json::to_value(model).map_err(|e| StateError::Conversion {
            field: name.clone(),
            message: e.to_string(),
        })?;
        self.set(name, Value::from_json(json))
    }

    /// Overlay `other` onto this state, field by field, under the same
    /// single-type rule as [`RunState::set`].
    pub fn merge(&mut self, other: RunState) -> Result<(), StateError> {
        for (name, value) in other.fields {
            self.set(name, value)?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for RunState {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name, value.normalized()))
                .collect(),
        }
    }
}

/// Handle to the state of one run, cloned into every step of that run
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<RunState>>,
}

impl SharedState {
    pub fn new(state: RunState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RunState> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.inner.write().await
    }

    pub async fn get(&self, name: &str) -> Option<Value> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn set(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, StateError> {
        self.inner.write().await.set(name, value)
    }

    pub async fn snapshot(&self) -> RunState {
        self.inner.read().await.clone()
    }
}
