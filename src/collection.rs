//! In-memory ordered collection with a key index.

use crate::error::{Result, StoreError};
use crate::types::{Record, RecordPatch};
use std::collections::HashMap;

/// Ordered records of one kind.
///
/// `records` keeps insertion order for listing; `positions` maps each
/// uniqueness key to its index in `records` and is rebuilt whenever
/// positions shift.
#[derive(Clone, Debug)]
pub struct Collection {
    /// Kind name, used in errors.
    kind: String,

    /// Name of the uniqueness key field.
    key_field: String,

    /// Records in insertion order.
    records: Vec<Record>,

    /// Key value -> position in `records`.
    positions: HashMap<String, usize>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(kind: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key_field: key_field.into(),
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build a collection from loaded records.
    ///
    /// Records without a usable key, and later records repeating an earlier
    /// key, are skipped. Returns the collection and the number skipped.
    pub fn from_records(
        kind: impl Into<String>,
        key_field: impl Into<String>,
        records: Vec<Record>,
    ) -> (Self, usize) {
        let mut collection = Self::new(kind, key_field);
        let mut skipped = 0;

        for record in records {
            if collection.insert(record).is_err() {
                skipped += 1;
            }
        }

        (collection, skipped)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.positions.get(key).map(|&pos| &self.records[pos])
    }

    /// Append a record. Fails with `DuplicateKey` without modifying anything.
    pub fn insert(&mut self, record: Record) -> Result<&Record> {
        let key = record.key(&self.key_field)?.to_string();
        if self.positions.contains_key(&key) {
            return Err(StoreError::duplicate(&self.kind, &key));
        }

        let pos = self.records.len();
        self.records.push(record);
        self.positions.insert(key, pos);
        Ok(&self.records[pos])
    }

    /// Apply a partial update to the record with `key`.
    ///
    /// If the patch changes the key, the new value must not belong to any
    /// other record. The record keeps its position.
    pub fn update(&mut self, key: &str, patch: &RecordPatch) -> Result<&Record> {
        let pos = *self
            .positions
            .get(key)
            .ok_or_else(|| StoreError::not_found(&self.kind, key))?;

        let mut updated = self.records[pos].clone();
        patch.apply_to(&mut updated);
        let new_key = updated.key(&self.key_field)?.to_string();

        if new_key != key {
            if self.positions.contains_key(&new_key) {
                return Err(StoreError::duplicate(&self.kind, &new_key));
            }
            self.positions.remove(key);
            self.positions.insert(new_key, pos);
        }

        self.records[pos] = updated;
        Ok(&self.records[pos])
    }

    /// Remove the record with `key`, closing the gap.
    pub fn remove(&mut self, key: &str) -> Result<Record> {
        let pos = self
            .positions
            .remove(key)
            .ok_or_else(|| StoreError::not_found(&self.kind, key))?;

        let removed = self.records.remove(pos);
        for p in self.positions.values_mut() {
            if *p > pos {
                *p -= 1;
            }
        }

        Ok(removed)
    }
}
