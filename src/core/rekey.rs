//! Re-keying of database identifiers into export ordinals.
//!
//! Exports never expose raw block or trial ids. Every identifier is mapped
//! to a small 1-based ordinal derived from enumeration or chronological
//! order, and one mapping is shared by every row of an export run.

use crate::dataset::TrialRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Assigns ordinals 1..N to keys in order of first observation.
#[derive(Debug, Clone)]
pub struct OrdinalMap<K> {
    ordinals: HashMap<K, u32>,
    order: Vec<K>,
}

impl<K> Default for OrdinalMap<K> {
    fn default() -> Self {
        Self {
            ordinals: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> OrdinalMap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from keys already in canonical order; repeats keep their first ordinal.
    pub fn from_ordered<I: IntoIterator<Item = K>>(keys: I) -> Self {
        let mut map = Self::new();
        for key in keys {
            map.observe(key);
        }
        map
    }

    /// Ordinal for `key`, assigning the next one if it is new.
    pub fn observe(&mut self, key: K) -> u32 {
        if let Some(&ordinal) = self.ordinals.get(&key) {
            return ordinal;
        }
        let ordinal = self.order.len() as u32 + 1;
        self.ordinals.insert(key.clone(), ordinal);
        self.order.push(key);
        ordinal
    }

    pub fn get(&self, key: &K) -> Option<u32> {
        self.ordinals.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in ordinal order.
    pub fn keys(&self) -> &[K] {
        &self.order
    }
}

/// Canonical order used to number blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOrder {
    /// First appearance in the persistence layer's row enumeration
    Enumeration,
    /// Block creation order (ids are allocated at creation)
    Creation,
}

/// All identifier mappings for one export run.
#[derive(Debug, Clone, Default)]
pub struct Rekeying {
    blocks: OrdinalMap<u64>,
    subjects: OrdinalMap<String>,
    subject_started_at: HashMap<String, DateTime<Utc>>,
    trials: HashMap<(u64, String), OrdinalMap<u64>>,
}

impl Rekeying {
    /// Build the mappings.
    ///
    /// `enumerated_blocks` is the block id of every input row in input order;
    /// it only matters for [`BlockOrder::Enumeration`].
    pub fn build<I>(trials: &[TrialRecord], enumerated_blocks: I, order: BlockOrder) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let blocks = match order {
            BlockOrder::Enumeration => OrdinalMap::from_ordered(enumerated_blocks),
            BlockOrder::Creation => {
                let mut ids: Vec<u64> = trials.iter().map(|t| t.block_id).collect();
                ids.sort_unstable();
                ids.dedup();
                OrdinalMap::from_ordered(ids)
            }
        };

        let mut subject_started_at: HashMap<String, DateTime<Utc>> = HashMap::new();
        for trial in trials {
            subject_started_at
                .entry(trial.subject_code.clone())
                .and_modify(|t| *t = (*t).min(trial.started_at))
                .or_insert(trial.started_at);
        }
        let mut subject_order: Vec<(&DateTime<Utc>, &String)> =
            subject_started_at.iter().map(|(code, t)| (t, code)).collect();
        subject_order.sort();
        let subjects = OrdinalMap::from_ordered(subject_order.into_iter().map(|(_, c)| c.clone()));

        let mut chronological: Vec<&TrialRecord> = trials.iter().collect();
        chronological.sort_by_key(|t| (t.started_at, t.trial_id));
        let mut trial_maps: HashMap<(u64, String), OrdinalMap<u64>> = HashMap::new();
        for trial in chronological {
            trial_maps
                .entry((trial.block_id, trial.subject_code.clone()))
                .or_default()
                .observe(trial.trial_id);
        }

        Self {
            blocks,
            subjects,
            subject_started_at,
            trials: trial_maps,
        }
    }

    pub fn block(&self, block_id: u64) -> Option<u32> {
        self.blocks.get(&block_id)
    }

    pub fn subject(&self, subject_code: &str) -> Option<u32> {
        self.subjects.get(&subject_code.to_string())
    }

    /// Earliest trial start of a subject within this experiment.
    pub fn subject_started_at(&self, subject_code: &str) -> Option<DateTime<Utc>> {
        self.subject_started_at.get(subject_code).copied()
    }

    /// Ordinal of a trial, local to its (block, subject) group.
    pub fn trial(&self, block_id: u64, subject_code: &str, trial_id: u64) -> Option<u32> {
        self.trials
            .get(&(block_id, subject_code.to_string()))
            .and_then(|m| m.get(&trial_id))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    /// Subject codes in ordinal order.
    pub fn subjects_in_order(&self) -> &[String] {
        self.subjects.keys()
    }
}
