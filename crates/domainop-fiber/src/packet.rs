//! Packet — the typed per-reconciliation context passed along a chain.
//!
//! Values are addressed by [`Key<T>`] constants. A key's name must be
//! unique within the process; looking a slot up with a key of a different
//! type yields `None`.
//!
//! Slots are reference counted. A fork shares every value with its parent
//! and a slot is copied only when one side mutates it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::FiberError;

/// Typed name of a packet slot.
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

trait Slot: Any + Send + Sync {
    fn clone_slot(&self) -> Arc<dyn Slot>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Clone + Send + Sync> Slot for T {
    fn clone_slot(&self) -> Arc<dyn Slot> {
        Arc::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Take the value out of a slot, copying it if a fork still shares it.
fn unwrap_slot<T: Any + Clone + Send + Sync>(slot: Arc<dyn Slot>) -> Option<T> {
    let value = slot.into_any().downcast::<T>().ok()?;
    Some(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone()))
}

/// A failure recorded by a step without ending its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Step or fiber that recorded the failure.
    pub source: String,
    /// What the failure is about, e.g. a server name.
    pub subject: Option<String>,
    pub message: String,
    /// Whether a later attempt may succeed.
    pub retryable: bool,
}

impl StepFailure {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            subject: None,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn from_error(source: impl Into<String>, error: &FiberError) -> Self {
        Self {
            source: source.into(),
            subject: None,
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Mutable context owned by the chain currently executing.
#[derive(Clone, Default)]
pub struct Packet {
    values: HashMap<&'static str, Arc<dyn Slot>>,
    failures: Vec<StepFailure>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with<T: Any + Clone + Send + Sync>(mut self, key: Key<T>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Store a value, returning the previous one of the same type.
    pub fn insert<T: Any + Clone + Send + Sync>(&mut self, key: Key<T>, value: T) -> Option<T> {
        self.values
            .insert(key.name, Arc::new(value))
            .and_then(unwrap_slot::<T>)
    }

    pub fn get<T: Any>(&self, key: Key<T>) -> Option<&T> {
        self.values
            .get(key.name)
            .and_then(|slot| (**slot).as_any().downcast_ref::<T>())
    }

    /// Mutable access; a slot shared with a fork is copied first.
    pub fn get_mut<T: Any>(&mut self, key: Key<T>) -> Option<&mut T> {
        let slot = self.values.get_mut(key.name)?;
        if !(**slot).as_any().is::<T>() {
            return None;
        }
        if Arc::get_mut(slot).is_none() {
            *slot = (**slot).clone_slot();
        }
        let slot: &mut dyn Slot = Arc::get_mut(slot)?;
        slot.as_any_mut().downcast_mut::<T>()
    }

    pub fn get_or_insert_with<T: Any + Clone + Send + Sync>(
        &mut self,
        key: Key<T>,
        init: impl FnOnce() -> T,
    ) -> &mut T {
        if self.get(key).is_none() {
            self.insert(key, init());
        }
        self.get_mut(key)
            .expect("slot was just populated with this type")
    }

    pub fn remove<T: Any + Clone + Send + Sync>(&mut self, key: Key<T>) -> Option<T> {
        match self.values.get(key.name) {
            Some(slot) if (**slot).as_any().is::<T>() => {
                self.values.remove(key.name).and_then(unwrap_slot::<T>)
            }
            _ => None,
        }
    }

    pub fn contains<T: Any>(&self, key: Key<T>) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn record_failure(&mut self, failure: StepFailure) {
        self.failures.push(failure);
    }

    pub(crate) fn extend_failures(&mut self, failures: &[StepFailure]) {
        self.failures.extend_from_slice(failures);
    }

    /// Packet for a forked child chain, sharing the parent's values.
    ///
    /// The child starts with no failures and without the parent's join
    /// results, so merging at the join never duplicates either.
    pub fn fork(&self) -> Packet {
        let values = self
            .values
            .iter()
            .filter(|(name, _)| **name != crate::engine::FORK_RESULTS.name())
            .map(|(name, slot)| (*name, Arc::clone(slot)))
            .collect();
        Packet {
            values,
            failures: Vec::new(),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&&'static str> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Packet")
            .field("keys", &keys)
            .field("failures", &self.failures)
            .finish()
    }
}
