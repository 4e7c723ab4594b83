//! Memoization primitives
//!
//! [`MemoCache`] maps keys to computed `Result`s and guarantees the compute
//! function runs at most once per key, no matter how many callers race on it.
//! [`OnceValue`] is the single-slot cell underneath: it runs a computation
//! once and replays the outcome, including a panic, to every caller.

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::ModuleError;

enum Outcome<T> {
    Value(T),
    Panicked(String),
}

/// A one-time computation whose outcome is shared by all callers
///
/// If the computation panics, the panic is captured and every caller
/// (the first one included) observes a panic with the same message.
/// The computation is never retried.
pub struct OnceValue<T> {
    cell: OnceCell<Outcome<T>>,
}

/// One-time computation of several values at once
pub type OnceValues<A, B> = OnceValue<(A, B)>;

impl<T> OnceValue<T> {
    pub fn new() -> Self {
        Self { cell: OnceCell::new() }
    }

    /// Return the value, computing it with `compute` on first access
    ///
    /// Concurrent callers block until the first computation finishes.
    pub fn get_or_init<F>(&self, compute: F) -> &T
    where
        F: FnOnce() -> T,
    {
        let outcome = self.cell.get_or_init(|| {
            match panic::catch_unwind(AssertUnwindSafe(compute)) {
                Ok(value) => Outcome::Value(value),
                Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
            }
        });
        replay(outcome)
    }

    /// The value, if it has already been computed
    pub fn get(&self) -> Option<&T> {
        self.cell.get().map(replay)
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Default for OnceValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for OnceValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(Outcome::Value(value)) => f.debug_tuple("OnceValue").field(value).finish(),
            Some(Outcome::Panicked(message)) => write!(f, "OnceValue(<panicked: {}>)", message),
            None => f.write_str("OnceValue(<uninit>)"),
        }
    }
}

fn replay<T>(outcome: &Outcome<T>) -> &T {
    match outcome {
        Outcome::Value(value) => value,
        Outcome::Panicked(message) => panic::resume_unwind(Box::new(message.clone())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Concurrency-safe compute-once cache of `Result`s
///
/// Resolved lookups only take the shared lock. A cold key takes the
/// exclusive lock just long enough to insert (or find, if another caller
/// won the race) its [`OnceValue`] slot; the computation itself runs
/// outside the map lock, serialized per key by the slot.
pub struct MemoCache<K, V, E = ModuleError> {
    entries: RwLock<HashMap<K, Arc<OnceValue<Result<V, E>>>>>,
}

impl<K, V, E> MemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get the value for `key`, or compute and store it
    ///
    /// `compute` runs at most once per key across all callers; errors are
    /// cached and replayed like values.
    pub fn get_or_add<F>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let existing = self.entries.read().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut entries = self.entries.write();
                // Re-check: another caller may have inserted while we waited
                entries.entry(key).or_default().clone()
            }
        };
        slot.get_or_init(compute).clone()
    }

    /// The stored result for `key`, if computation has completed
    pub fn get(&self, key: &K) -> Option<Result<V, E>> {
        let slot = self.entries.read().get(key).cloned()?;
        slot.get().cloned()
    }

    /// Drop every entry whose key fails `keep`
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.entries.write().retain(|key, _| keep(key));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V, E> Default for MemoCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
