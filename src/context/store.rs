//! Run-scoped Variable Store
//!
//! A [`Context`] is a cheap, cloneable handle to one variable map. Cloning
//! the handle shares the map; [`Context::fork`] makes an independent copy.
//! Parallel constructs pick one or the other through [`ContextPolicy`].
//!
//! Every individual operation takes the lock once, so a single read, write
//! or increment is atomic. Sequences of operations from concurrent branches
//! sharing one handle are not, and may interleave.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

/// Key suffix under which a step publishes its textual result.
pub const OUTPUT_SUFFIX: &str = ".output";

/// Shared mapping from variable name to value.
#[derive(Clone, Default)]
pub struct Context {
    vars: Arc<RwLock<HashMap<String, Value>>>,
}

/// How a nested step list sees its parent's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPolicy {
    /// Same map as the parent; writes are visible to everyone
    Shared,
    /// Private copy taken at fan-out time; writes stay local
    Isolated,
}

impl ContextPolicy {
    /// Produces the context a branch should run against.
    pub fn apply(self, parent: &Context) -> Context {
        match self {
            Self::Shared => parent.clone(),
            Self::Isolated => parent.fork(),
        }
    }
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context pre-populated with variables.
    pub fn from_map(vars: HashMap<String, Value>) -> Self {
        Self {
            vars: Arc::new(RwLock::new(vars)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.vars.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.vars.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Looks up a possibly dotted name.
    ///
    /// The flat key wins (`fetch.output` is stored flat). Otherwise the first
    /// segment is looked up and the remaining segments index into it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let vars = self.read();
        if let Some(value) = vars.get(name) {
            return Some(value.clone());
        }

        let mut segments = name.split('.');
        let mut current = vars.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Returns true if `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().insert(key.into(), value.into());
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Atomically replaces the value under `key` with `f(current)`.
    pub fn update<F, E>(&self, key: &str, f: F) -> Result<Value, E>
    where
        F: FnOnce(Option<&Value>) -> Result<Value, E>,
    {
        let mut vars = self.write();
        let next = f(vars.get(key))?;
        vars.insert(key.to_string(), next.clone());
        Ok(next)
    }

    /// Publishes a step's textual result under `<id>.output`.
    pub fn set_output(&self, id: &str, text: impl Into<String>) {
        self.set(format!("{}{}", id, OUTPUT_SUFFIX), Value::String(text.into()));
    }

    /// Reads a step's textual result, empty if it never ran.
    pub fn output(&self, id: &str) -> String {
        match self.get(&format!("{}{}", id, OUTPUT_SUFFIX)) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Copies the current variables out of the store.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    /// Creates an independent context holding a copy of the current variables.
    pub fn fork(&self) -> Context {
        Self::from_map(self.snapshot())
    }

    /// Returns true if both handles point at the same map.
    pub fn shares_with(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.vars, &other.vars)
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.read().iter()).finish()
    }
}

impl From<HashMap<String, Value>> for Context {
    fn from(vars: HashMap<String, Value>) -> Self {
        Self::from_map(vars)
    }
}
