//! Abstract stores: maps from variable names to lattice values.
//!
//! Absent keys read as bottom, and setting a key to bottom removes it, so
//! a store never carries explicit bottom entries and pointwise equality is
//! plain map equality. Iteration is ordered, which is what makes the
//! per-block printouts deterministic.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::AbstractValue;

/// A mapping from variable name to abstract value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store<V> {
    values: BTreeMap<String, V>,
}

impl<V> Default for Store<V> {
    fn default() -> Self {
        Store { values: BTreeMap::new() }
    }
}

impl<V: AbstractValue> Store<V> {
    pub fn new() -> Self {
        Store { values: BTreeMap::new() }
    }

    /// The value of `name`; absent keys are bottom.
    pub fn get(&self, name: &str) -> V {
        self.values.get(name).cloned().unwrap_or_else(V::bottom)
    }

    /// Bind `name` to `value`. Binding bottom removes the key.
    pub fn set(&mut self, name: &str, value: V) {
        if value.is_bottom() {
            self.values.remove(name);
        } else {
            self.values.insert(name.to_string(), value);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.values.remove(name);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.values.iter()
    }

    /// Names bound in this store (to a non-bottom value).
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Pointwise join. The flag reports whether the result is strictly
    /// above `self`, which is what the worklist driver uses to decide
    /// whether a successor must be revisited.
    pub fn join(&self, other: &Store<V>) -> (Store<V>, bool) {
        let mut result = self.clone();
        let mut changed = false;
        for (name, value) in &other.values {
            let old = result.get(name);
            let joined = old.join(value);
            if joined != old {
                changed = true;
            }
            result.set(name, joined);
        }
        (result, changed)
    }

    /// Pointwise widening of `self` (the previous iterate) with `new`.
    pub fn widen(&self, new: &Store<V>) -> Store<V> {
        let mut result = Store::new();
        let mut names: Vec<&String> = self.values.keys().collect();
        names.extend(new.values.keys());
        names.sort();
        names.dedup();
        for name in names {
            result.set(name, self.get(name).widen(&new.get(name)));
        }
        result
    }
}

impl<V: AbstractValue> fmt::Display for Store<V> {
    /// The per-block report block: one `  name -> value` line per binding.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.values {
            writeln!(f, "  {name} -> {value}")?;
        }
        Ok(())
    }
}
