//! Change tracking
//!
//! The tracker holds a column-value snapshot of every instance the context
//! knows about, keyed by entity type and primary key. Entries keep the order in
//! which they were first tracked; `save_changes` flushes them in that order.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::backends::DatabaseValue;
use crate::error::{ModelError, OrmResult};
use crate::model::ColumnValues;

/// State of an instance with respect to the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// Which columns an UPDATE has to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifiedColumns {
    All,
    Only(BTreeSet<&'static str>),
}

/// One tracked instance
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    pub(crate) type_id: TypeId,
    pub(crate) identity: Option<String>,
    pub(crate) key: DatabaseValue,
    pub(crate) values: ColumnValues,
    pub(crate) state: EntityState,
    pub(crate) modified: ModifiedColumns,
}

impl TrackedEntry {
    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn values(&self) -> &ColumnValues {
        &self.values
    }

    pub fn modified(&self) -> &ModifiedColumns {
        &self.modified
    }
}

type IdentityKey = (TypeId, String);

/// Tracked instances of one context
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: BTreeMap<u64, TrackedEntry>,
    identities: HashMap<IdentityKey, u64>,
    next_id: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn identity_of(key: &DatabaseValue) -> Option<String> {
        (!key.is_null()).then(|| key.identity_key())
    }

    fn insert(
        &mut self,
        type_id: TypeId,
        key: DatabaseValue,
        values: ColumnValues,
        state: EntityState,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let identity = Self::identity_of(&key);
        if let Some(identity) = &identity {
            self.identities.insert((type_id, identity.clone()), id);
        }
        let modified = match state {
            EntityState::Modified => ModifiedColumns::All,
            _ => ModifiedColumns::Only(BTreeSet::new()),
        };
        self.entries.insert(
            id,
            TrackedEntry {
                type_id,
                identity,
                key,
                values,
                state,
                modified,
            },
        );
        id
    }

    /// Entry id of a tracked instance
    pub fn lookup(&self, type_id: TypeId, key: &DatabaseValue) -> Option<u64> {
        let identity = Self::identity_of(key)?;
        self.identities.get(&(type_id, identity)).copied()
    }

    pub fn entry(&self, id: u64) -> Option<&TrackedEntry> {
        self.entries.get(&id)
    }

    pub fn state_of(&self, type_id: TypeId, key: &DatabaseValue) -> EntityState {
        self.lookup(type_id, key)
            .and_then(|id| self.entries.get(&id))
            .map_or(EntityState::Detached, |entry| entry.state)
    }

    /// Track a new instance as `Added`
    pub fn add(
        &mut self,
        type_id: TypeId,
        key: DatabaseValue,
        values: ColumnValues,
    ) -> OrmResult<u64> {
        if let Some(id) = self.lookup(type_id, &key) {
            let entry = self.entries.get_mut(&id).ok_or_else(|| dangling(id))?;
            if entry.state != EntityState::Added {
                return Err(ModelError::Validation(format!(
                    "An instance with key {} is already tracked as {:?}",
                    key.identity_key(),
                    entry.state
                )));
            }
            entry.values = values;
            return Ok(id);
        }
        Ok(self.insert(type_id, key, values, EntityState::Added))
    }

    /// Track an instance as `Unchanged`; an instance already tracked is left as is
    pub fn attach(&mut self, type_id: TypeId, key: DatabaseValue, values: ColumnValues) -> u64 {
        match self.lookup(type_id, &key) {
            Some(id) => id,
            None => self.insert(type_id, key, values, EntityState::Unchanged),
        }
    }

    /// Replace the snapshot and mark every column modified; `Added` entries stay `Added`
    pub fn mark_modified(
        &mut self,
        type_id: TypeId,
        key: DatabaseValue,
        values: ColumnValues,
    ) -> u64 {
        match self.lookup(type_id, &key) {
            Some(id) => {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.values = values;
                    if entry.state != EntityState::Added {
                        entry.state = EntityState::Modified;
                        entry.modified = ModifiedColumns::All;
                    }
                }
                id
            }
            None => self.insert(type_id, key, values, EntityState::Modified),
        }
    }

    /// Mark only `columns` modified on an entry that was attached beforehand
    pub fn mark_columns_modified(
        &mut self,
        id: u64,
        values: ColumnValues,
        columns: &[&'static str],
    ) -> OrmResult<()> {
        let entry = self.entries.get_mut(&id).ok_or_else(|| dangling(id))?;
        entry.values = values;
        match entry.state {
            EntityState::Deleted => {
                return Err(ModelError::Validation(
                    "Cannot modify an instance marked for deletion".to_string(),
                ))
            }
            EntityState::Added => return Ok(()),
            _ => {}
        }
        entry.state = EntityState::Modified;
        if let ModifiedColumns::Only(set) = &mut entry.modified {
            set.extend(columns.iter().copied());
        }
        Ok(())
    }

    /// Force an entry back to `Unchanged` with a fresh snapshot
    pub fn reset_unchanged(&mut self, id: u64, values: ColumnValues) -> OrmResult<()> {
        let entry = self.entries.get_mut(&id).ok_or_else(|| dangling(id))?;
        entry.values = values;
        entry.state = EntityState::Unchanged;
        entry.modified = ModifiedColumns::Only(BTreeSet::new());
        Ok(())
    }

    /// Mark `Deleted`; an `Added` entry is dropped instead
    pub fn mark_deleted(&mut self, id: u64) -> OrmResult<()> {
        let entry = self.entries.get_mut(&id).ok_or_else(|| dangling(id))?;
        if entry.state == EntityState::Added {
            self.detach(id);
        } else {
            entry.state = EntityState::Deleted;
        }
        Ok(())
    }

    pub fn detach(&mut self, id: u64) -> Option<TrackedEntry> {
        let entry = self.entries.remove(&id)?;
        if let Some(identity) = &entry.identity {
            self.identities.remove(&(entry.type_id, identity.clone()));
        }
        Some(entry)
    }

    /// Entries that `save_changes` has to write, in tracking order
    pub fn pending(&self) -> impl Iterator<Item = (u64, &TrackedEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| {
                matches!(
                    entry.state,
                    EntityState::Added | EntityState::Modified | EntityState::Deleted
                )
            })
            .map(|(id, entry)| (*id, entry))
    }

    pub fn has_changes(&self) -> bool {
        self.pending().next().is_some()
    }

    /// Settle entries after a successful save
    pub fn accept_changes(&mut self) {
        let ids: Vec<u64> = self.entries.keys().copied().collect();
        for id in ids {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            match entry.state {
                EntityState::Deleted => {
                    self.detach(id);
                }
                // Store-generated key: the instance can no longer be addressed
                EntityState::Added if entry.identity.is_none() => {
                    self.detach(id);
                }
                EntityState::Added | EntityState::Modified => {
                    entry.state = EntityState::Unchanged;
                    entry.modified = ModifiedColumns::Only(BTreeSet::new());
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.identities.clear();
    }
}

fn dangling(id: u64) -> ModelError {
    ModelError::Validation(format!("Tracked entry {} no longer exists", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item;

    fn tid() -> TypeId {
        TypeId::of::<Item>()
    }

    #[test]
    fn test_add_then_accept_becomes_unchanged() {
        let mut tracker = ChangeTracker::new();
        tracker.add(tid(), DatabaseValue::Int64(1), ColumnValues::default()).unwrap();
        assert_eq!(tracker.state_of(tid(), &DatabaseValue::Int64(1)), EntityState::Added);
        tracker.accept_changes();
        assert_eq!(tracker.state_of(tid(), &DatabaseValue::Int64(1)), EntityState::Unchanged);
    }

    #[test]
    fn test_added_without_key_is_detached_after_save() {
        let mut tracker = ChangeTracker::new();
        tracker.add(tid(), DatabaseValue::Null, ColumnValues::default()).unwrap();
        assert_eq!(tracker.pending().count(), 1);
        tracker.accept_changes();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_attach_never_overrides_existing_state() {
        let mut tracker = ChangeTracker::new();
        let id = tracker.mark_modified(tid(), DatabaseValue::Int64(5), ColumnValues::default());
        assert_eq!(tracker.attach(tid(), DatabaseValue::Int64(5), ColumnValues::default()), id);
        assert_eq!(tracker.entry(id).unwrap().state(), EntityState::Modified);
    }

    #[test]
    fn test_deleting_added_entry_detaches_it() {
        let mut tracker = ChangeTracker::new();
        let id = tracker.add(tid(), DatabaseValue::Int64(2), ColumnValues::default()).unwrap();
        tracker.mark_deleted(id).unwrap();
        assert_eq!(tracker.state_of(tid(), &DatabaseValue::Int64(2)), EntityState::Detached);
        assert!(!tracker.has_changes());
    }

    #[test]
    fn test_deleted_entries_are_removed_after_save() {
        let mut tracker = ChangeTracker::new();
        let id = tracker.attach(tid(), DatabaseValue::Int64(3), ColumnValues::default());
        tracker.mark_deleted(id).unwrap();
        tracker.accept_changes();
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn test_column_scoped_modification() {
        let mut tracker = ChangeTracker::new();
        let id = tracker.attach(tid(), DatabaseValue::Int64(4), ColumnValues::default());
        tracker
            .mark_columns_modified(id, ColumnValues::default(), &["name"])
            .unwrap();
        let entry = tracker.entry(id).unwrap();
        assert_eq!(entry.state(), EntityState::Modified);
        assert_eq!(entry.modified(), &ModifiedColumns::Only(BTreeSet::from(["name"])));
    }

    #[test]
    fn test_adding_a_tracked_key_twice_is_rejected() {
        let mut tracker = ChangeTracker::new();
        tracker.attach(tid(), DatabaseValue::Int64(6), ColumnValues::default());
        assert!(matches!(
            tracker.add(tid(), DatabaseValue::Int64(6), ColumnValues::default()),
            Err(ModelError::Validation(_))
        ));
    }
}
