//! Identity-keyed arena for datasets, algorithms, scores and run results.
//!
//! Handles come from a per-registry monotonically increasing counter and are
//! never reused while the process lives. They are not stable across restarts,
//! which is why persisted state addresses entities by name instead.

use crate::error::{LabError, LabResult};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Entities that can be looked up by name at persistence boundaries.
pub trait Named {
    /// Human-readable kind used in error messages ("dataset", "algorithm", ...).
    const KIND: &'static str;

    fn name(&self) -> &str;
}

/// Opaque handle into a [`Registry<T>`].
pub struct Id<T> {
    raw: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    fn new(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn raw(self) -> u64 {
        self.raw
    }

    #[cfg(test)]
    pub(crate) fn from_raw_for_tests(raw: u64) -> Self {
        Self::new(raw)
    }
}

// Manual impls: derives would put bounds on `T`.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.raw)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

impl<T> std::str::FromStr for Id<T> {
    type Err = std::num::ParseIntError;

    /// Accepts both `7` and `#7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse::<u64>().map(Id::new)
    }
}

pub struct Registry<T> {
    next: u64,
    entries: BTreeMap<u64, T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next: 1,
            entries: BTreeMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always succeeds; the returned handle has never been handed out before.
    pub fn insert(&mut self, entity: T) -> Id<T> {
        let id = Id::new(self.next);
        self.next += 1;
        self.entries.insert(id.raw, entity);
        id
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.entries.contains_key(&id.raw)
    }

    /// Returns the removed entity, `None` if the handle was already gone.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        self.entries.remove(&id.raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. The counter keeps running so old handles stay dead.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> + '_ {
        self.entries.iter().map(|(raw, e)| (Id::new(*raw), e))
    }

    pub fn ids(&self) -> Vec<Id<T>> {
        self.entries.keys().map(|raw| Id::new(*raw)).collect()
    }
}

impl<T: Named> Registry<T> {
    pub fn get(&self, id: Id<T>) -> LabResult<&T> {
        self.entries
            .get(&id.raw)
            .ok_or_else(|| LabError::not_found(T::KIND, id))
    }

    /// Linear scan; reserved for name-addressed boundaries (sessions, CLI input).
    pub fn find_by_name(&self, name: &str) -> Option<Id<T>> {
        self.iter().find(|(_, e)| e.name() == name).map(|(id, _)| id)
    }

    /// Resolve a user-supplied reference: a handle (`#3` / `3`) or an exact
    /// name. A name shared by several entries is refused.
    pub fn resolve(&self, reference: &str) -> LabResult<Id<T>> {
        let matches: Vec<Id<T>> = self
            .iter()
            .filter(|(_, e)| e.name() == reference)
            .map(|(id, _)| id)
            .collect();
        match matches.as_slice() {
            [id] => return Ok(*id),
            [] => {}
            _ => {
                return Err(LabError::Ambiguous {
                    kind: T::KIND,
                    name: reference.to_string(),
                    handles: matches.iter().map(ToString::to_string).collect(),
                })
            }
        }
        match reference.parse::<Id<T>>() {
            Ok(id) if self.contains(id) => Ok(id),
            _ => Err(LabError::not_found(T::KIND, reference)),
        }
    }

    /// One-shot name → handle table used while reconciling persisted state.
    pub fn name_index(&self) -> BTreeMap<String, Id<T>> {
        self.iter()
            .map(|(id, e)| (e.name().to_string(), id))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|(_, e)| e.name().to_string()).collect()
    }
}
