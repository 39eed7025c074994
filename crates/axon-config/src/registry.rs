//! Name-keyed registries for listeners and stores.
//!
//! Entries are persisted as a YAML sequence of tagged records but held in a
//! map keyed by name, so a name is never registered twice. Disabled entries
//! stay in the registry and are reported through
//! [`RegistryError::ServiceDisabled`] when requested.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RegistryError;

/// Record stored in a [`NamedRegistry`].
pub trait Named {
    /// Label used in diagnostics, for example `listener`.
    const KIND: &'static str;

    /// Unique key of the entry.
    fn name(&self) -> &str;

    /// Whether the entry is configured but must not be started.
    fn is_disabled(&self) -> bool {
        false
    }
}

/// Map of uniquely named configuration records.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedRegistry<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: Named> NamedRegistry<T> {
    /// Builds a registry, rejecting repeated names.
    pub fn from_entries(entries: impl IntoIterator<Item = T>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for entry in entries {
            let name = entry.name().to_owned();
            if registry.entries.contains_key(&name) {
                return Err(RegistryError::DuplicateName {
                    kind: T::KIND,
                    name,
                });
            }
            registry.entries.insert(name, entry);
        }
        Ok(registry)
    }

    /// Inserts an entry, replacing any entry of the same name.
    pub fn insert(&mut self, entry: T) -> Option<T> {
        self.entries.insert(entry.name().to_owned(), entry)
    }

    /// Returns the named entry, creating it with `make` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ServiceDisabled`] when the entry exists but is
    /// disabled, or when the freshly created entry is disabled.
    pub fn insert_or_get(
        &mut self,
        name: &str,
        make: impl FnOnce() -> T,
    ) -> Result<&mut T, RegistryError> {
        let entry = self.entries.entry(name.to_owned()).or_insert_with(make);
        if entry.is_disabled() {
            return Err(RegistryError::ServiceDisabled {
                name: name.to_owned(),
            });
        }
        Ok(entry)
    }

    /// Looks up an entry by name, disabled or not.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name)
    }

    /// Removes an entry by name.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.entries.remove(name)
    }

    /// Whether the registry holds the named entry.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterates over all entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    /// Iterates mutably over all entries in name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    /// Iterates over entries that are not disabled.
    pub fn enabled(&self) -> impl Iterator<Item = &T> {
        self.entries.values().filter(|entry| !entry.is_disabled())
    }

    /// Names currently registered.
    pub fn names(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Serialize> Serialize for NamedRegistry<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

impl<'de, T> Deserialize<'de> for NamedRegistry<T>
where
    T: Named + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default();
        Self::from_entries(entries).map_err(D::Error::custom)
    }
}
