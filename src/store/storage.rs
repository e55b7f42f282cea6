use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::error::{Error, Result};
use crate::store::key::EntryKey;
use crate::store::value::{ReadingValue, Scalar, ScalarKind, ScalarValue};

type Callback = Arc<dyn Fn(EntryKey) + Send + Sync>;

/// Fan-out point for change notifications on one storage.
///
/// Callbacks are cloned out of the observer list before they run, so an
/// observer is free to read (or even write) the storage it observes.
pub(crate) struct Notifier {
    observers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl Notifier {
    fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn notify(&self, key: EntryKey) {
        let callbacks: Vec<Callback> = match self.observers.lock() {
            Ok(guard) => guard.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(key);
        }
    }

    fn attach(&self, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.observers.lock() {
            guard.push((id, callback));
        }
        id
    }

    fn detach(&self, id: u64) {
        if let Ok(mut guard) = self.observers.lock() {
            guard.retain(|(observer_id, _)| *observer_id != id);
        }
    }
}

/// RAII handle for an observer registration; dropping it detaches the
/// observer.
pub struct Subscription {
    id: u64,
    notifier: Weak<Notifier>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.detach(self.id);
        }
    }
}

enum Deferred {
    None,
    Distribute {
        children: Vec<Arc<dyn crate::battery::BatteryElement>>,
        key: EntryKey,
        value: f64,
    },
    Assign {
        assign: crate::store::value::AssignFn,
        value: Scalar,
    },
}

/// Concurrent map from [`EntryKey`] to reading backings, with change
/// notification.
///
/// Every entry sits behind its own lock. Mutations that need to touch other
/// storages (distributing a write to children, running an assignment
/// closure) are extracted under the entry lock and executed only after all
/// locks are released, so observers and child storages can never see this
/// storage half-locked.
pub struct ReadingStorage {
    entries: RwLock<HashMap<EntryKey, Arc<RwLock<ReadingValue>>>>,
    notifier: Arc<Notifier>,
}

impl Default for ReadingStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            notifier: Arc::new(Notifier::new()),
        }
    }

    pub(crate) fn notifier(&self) -> Arc<Notifier> {
        Arc::clone(&self.notifier)
    }

    /// Creates (or replaces) the backing for `key`.
    pub fn create_value(&self, key: EntryKey, value: ReadingValue) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, Arc::new(RwLock::new(value)));
        }
        self.notifier.notify(key);
    }

    pub fn contains(&self, key: EntryKey) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<EntryKey> {
        self.entries
            .read()
            .map(|entries| entries.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn keys_in(&self, namespace: &str) -> Vec<EntryKey> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .keys()
                    .filter(|key| key.namespace == namespace)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn entry(&self, key: EntryKey) -> Result<Arc<RwLock<ReadingValue>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::InvalidConfig("reading storage poisoned".into()))?;
        entries
            .get(&key)
            .cloned()
            .ok_or(Error::UndefinedReading(key))
    }

    /// Current value of `key`, `Ok(None)` when the entry exists but has not
    /// been measured yet.
    pub fn get_value(&self, key: EntryKey) -> Result<Option<Scalar>> {
        let entry = self.entry(key)?;
        let snapshot = entry
            .read()
            .map_err(|_| Error::InvalidConfig("reading storage poisoned".into()))?
            .clone();
        self.resolve(&snapshot)
    }

    /// Like [`get_value`](Self::get_value) but swallowing every fault,
    /// for display paths that must not propagate errors.
    pub fn try_get_value(&self, key: EntryKey) -> Option<Scalar> {
        self.get_value(key).ok().flatten()
    }

    /// Typed read; undefined readings and kind mismatches are errors.
    pub fn get<T: ScalarValue>(&self, key: EntryKey) -> Result<T> {
        let scalar = self
            .get_value(key)?
            .ok_or(Error::UndefinedReading(key))?;
        T::from_scalar(&scalar).ok_or(Error::TypeMismatch {
            key,
            requested: T::KIND,
            stored: scalar.kind(),
        })
    }

    fn resolve(&self, value: &ReadingValue) -> Result<Option<Scalar>> {
        match value {
            ReadingValue::Typed(typed) => Ok(typed.value.clone()),
            ReadingValue::Fallback(chain) => {
                for variant in chain {
                    if let Some(scalar) = self.resolve(variant)? {
                        return Ok(Some(scalar));
                    }
                }
                Ok(None)
            }
            ReadingValue::Math(math) => {
                // An aggregate is only meaningful once every child reports
                // the key; a single missing reading leaves it undefined.
                let mut readings = Vec::with_capacity(math.children.len());
                for child in &math.children {
                    let Some(scalar) = child.storage().get_value(math.key)? else {
                        return Ok(None);
                    };
                    match scalar.as_float() {
                        Some(v) => readings.push(v),
                        None => {
                            return Err(Error::TypeMismatch {
                                key: math.key,
                                requested: ScalarKind::Float,
                                stored: scalar.kind(),
                            })
                        }
                    }
                }
                if readings.is_empty() {
                    return Ok(None);
                }
                math.aggregation.combine(&readings).map(|v| Some(Scalar::Float(v)))
            }
            ReadingValue::Computed(computed) => (computed.get)(),
        }
    }

    /// Writes `value` to `key` and notifies observers.
    ///
    /// A write to a fallback chain lands on its first variant. A write to a
    /// mathematical entry requires a distribution and is pushed down to the
    /// children after this storage's locks are released.
    pub fn set(&self, key: EntryKey, value: Scalar) -> Result<()> {
        let entry = self.entry(key)?;
        let deferred = {
            let mut guard = entry
                .write()
                .map_err(|_| Error::InvalidConfig("reading storage poisoned".into()))?;
            Self::write_in_place(&mut guard, key, value)?
        };
        match deferred {
            Deferred::None => {}
            Deferred::Distribute {
                children,
                key: child_key,
                value,
            } => {
                let share = value / children.len() as f64;
                for child in &children {
                    child.storage().set(child_key, Scalar::Float(share))?;
                }
            }
            Deferred::Assign { assign, value } => assign(value)?,
        }
        self.notifier.notify(key);
        Ok(())
    }

    fn write_in_place(target: &mut ReadingValue, key: EntryKey, value: Scalar) -> Result<Deferred> {
        match target {
            ReadingValue::Typed(typed) => {
                let coerced = match (typed.kind, &value) {
                    (ScalarKind::Float, Scalar::Int(v)) => Scalar::Float(*v as f64),
                    _ => value,
                };
                if coerced.kind() != typed.kind {
                    return Err(Error::TypeMismatch {
                        key,
                        requested: coerced.kind(),
                        stored: typed.kind,
                    });
                }
                typed.value = Some(coerced);
                Ok(Deferred::None)
            }
            ReadingValue::Fallback(chain) => match chain.first_mut() {
                Some(first) => Self::write_in_place(first, key, value),
                None => Err(Error::InvalidConfig(format!(
                    "{key}: empty fallback chain"
                ))),
            },
            ReadingValue::Math(math) => {
                if math.distribution.is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "{key}: aggregate is not writable"
                    )));
                }
                let value = value.as_float().ok_or(Error::TypeMismatch {
                    key,
                    requested: value.kind(),
                    stored: ScalarKind::Float,
                })?;
                Ok(Deferred::Distribute {
                    children: math.children.clone(),
                    key: math.key,
                    value,
                })
            }
            ReadingValue::Computed(computed) => match &computed.set {
                Some(assign) => Ok(Deferred::Assign {
                    assign: Arc::clone(assign),
                    value,
                }),
                None => Err(Error::InvalidConfig(format!(
                    "{key}: computed reading is not writable"
                ))),
            },
        }
    }

    /// Clears the measured value of `key`; the entry itself stays.
    pub fn reset(&self, key: EntryKey) -> Result<()> {
        let entry = self.entry(key)?;
        {
            let mut guard = entry
                .write()
                .map_err(|_| Error::InvalidConfig("reading storage poisoned".into()))?;
            Self::clear_in_place(&mut guard);
        }
        self.notifier.notify(key);
        Ok(())
    }

    fn clear_in_place(target: &mut ReadingValue) {
        match target {
            ReadingValue::Typed(typed) => typed.value = None,
            ReadingValue::Fallback(chain) => {
                for variant in chain {
                    Self::clear_in_place(variant);
                }
            }
            ReadingValue::Math(_) | ReadingValue::Computed(_) => {}
        }
    }

    /// Registers `callback` to run after every mutation, with the key that
    /// changed. The registration lives as long as the returned guard.
    #[must_use]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(EntryKey) + Send + Sync + 'static,
    {
        let id = self.notifier.attach(Arc::new(callback));
        Subscription {
            id,
            notifier: Arc::downgrade(&self.notifier),
        }
    }

    /// Moves every entry of `other` into this storage. Entries already
    /// present here are overwritten.
    pub fn merge(&self, other: &ReadingStorage) {
        let moved: Vec<(EntryKey, Arc<RwLock<ReadingValue>>)> = match other.entries.write() {
            Ok(mut entries) => entries.drain().collect(),
            Err(_) => return,
        };
        let mut keys = Vec::with_capacity(moved.len());
        if let Ok(mut entries) = self.entries.write() {
            for (key, value) in moved {
                keys.push(key);
                entries.insert(key, value);
            }
        }
        for key in keys {
            self.notifier.notify(key);
        }
    }
}
