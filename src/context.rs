//! Running delta state shared by consecutive blocks of one encoder or decoder.

use std::collections::HashMap;

use crate::codecs::DictionaryContext;

/// Default number of distinct values the recency dictionary remembers.
pub const DICTIONARY_CAPACITY: usize = 256;

/// Bounded value dictionary. Once full, each new value overwrites the
/// oldest slot, so encoder and decoder evict in lockstep.
#[derive(Debug, Clone)]
pub struct RecencyDictionary {
    capacity: usize,
    entries: Vec<i64>,
    index: HashMap<i64, usize>,
    cursor: usize,
}

impl RecencyDictionary {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecencyDictionary {
    fn default() -> Self {
        Self::new(DICTIONARY_CAPACITY)
    }
}

impl DictionaryContext for RecencyDictionary {
    fn lookup(&self, value: i64) -> Option<usize> {
        self.index.get(&value).copied()
    }

    fn get(&self, index: usize) -> Option<i64> {
        self.entries.get(index).copied()
    }

    fn insert(&mut self, value: i64) {
        if self.index.contains_key(&value) {
            return;
        }
        if self.entries.len() < self.capacity {
            self.index.insert(value, self.entries.len());
            self.entries.push(value);
            return;
        }
        let slot = self.cursor;
        let evicted = self.entries[slot];
        self.index.remove(&evicted);
        self.entries[slot] = value;
        self.index.insert(value, slot);
        self.cursor = (self.cursor + 1) % self.capacity;
    }
}

/// Scalar part of the running state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaState {
    pub last_timestamp: i64,
    pub last_timestamp_delta: i64,
    pub last_value: i64,
    pub last_value_delta: i64,
}

/// Everything needed to undo a speculative block. Obtained from
/// [`DeltaContext::begin`] and consumed by `commit` or `abort`.
#[derive(Debug, Clone)]
#[must_use = "a checkpoint must be committed or aborted"]
pub struct Checkpoint {
    state: DeltaState,
    dictionary: Option<RecencyDictionary>,
}

impl Checkpoint {
    pub fn state(&self) -> DeltaState {
        self.state
    }
}

/// Per-instance delta context. Owned by exactly one encoder or decoder.
#[derive(Debug, Clone, Default)]
pub struct DeltaContext {
    state: DeltaState,
    dictionary: Option<RecencyDictionary>,
}

impl DeltaContext {
    /// Context with a recency dictionary enabled.
    pub fn with_dictionary() -> Self {
        Self {
            state: DeltaState::default(),
            dictionary: Some(RecencyDictionary::default()),
        }
    }

    /// Context without a dictionary (`context_mode = off`).
    pub fn without_dictionary() -> Self {
        Self::default()
    }

    pub fn dictionary_mut(&mut self) -> Option<&mut RecencyDictionary> {
        self.dictionary.as_mut()
    }

    pub fn state(&self) -> DeltaState {
        self.state
    }

    /// Cheap copy of the scalar state.
    pub fn snapshot(&self) -> DeltaState {
        self.state
    }

    pub fn restore(&mut self, state: DeltaState) {
        self.state = state;
    }

    /// Open a speculative block.
    pub fn begin(&self) -> Checkpoint {
        Checkpoint {
            state: self.state,
            dictionary: self.dictionary.clone(),
        }
    }

    /// Keep everything done since `begin`.
    pub fn commit(&mut self, checkpoint: Checkpoint) {
        drop(checkpoint);
    }

    /// Revert scalars and dictionary to the state captured by `begin`.
    pub fn abort(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.state;
        if self.dictionary.is_some() {
            self.dictionary = checkpoint.dictionary;
        }
    }

    /// Delta-of-delta of each timestamp relative to the running state,
    /// advancing the state past the chunk.
    pub fn time_deltas(&mut self, timestamps: &[i64]) -> Vec<i64> {
        let mut prev = self.state.last_timestamp;
        let mut prev_delta = self.state.last_timestamp_delta;
        let mut out = Vec::with_capacity(timestamps.len());
        for &ts in timestamps {
            let delta = ts.wrapping_sub(prev);
            out.push(delta.wrapping_sub(prev_delta));
            prev = ts;
            prev_delta = delta;
        }
        self.state.last_timestamp = prev;
        self.state.last_timestamp_delta = prev_delta;
        out
    }

    /// First difference of each value relative to the running state,
    /// advancing the state past the chunk.
    pub fn value_deltas(&mut self, values: &[i64]) -> Vec<i64> {
        let mut prev = self.state.last_value;
        let mut prev_delta = self.state.last_value_delta;
        let mut out = Vec::with_capacity(values.len());
        for &v in values {
            let delta = v.wrapping_sub(prev);
            out.push(delta);
            prev = v;
            prev_delta = delta;
        }
        self.state.last_value = prev;
        self.state.last_value_delta = prev_delta;
        out
    }

    /// Inverse of [`time_deltas`](Self::time_deltas). The state only moves
    /// when `commit` is set.
    pub fn apply_time_deltas(&mut self, dods: &[i64], commit: bool) -> Vec<i64> {
        let mut prev = self.state.last_timestamp;
        let mut prev_delta = self.state.last_timestamp_delta;
        let mut out = Vec::with_capacity(dods.len());
        for &dod in dods {
            let delta = prev_delta.wrapping_add(dod);
            let ts = prev.wrapping_add(delta);
            out.push(ts);
            prev = ts;
            prev_delta = delta;
        }
        if commit && !dods.is_empty() {
            self.state.last_timestamp = prev;
            self.state.last_timestamp_delta = prev_delta;
        }
        out
    }

    /// Inverse of [`value_deltas`](Self::value_deltas). With `delta_of_delta`
    /// the input holds second differences instead of first differences.
    pub fn apply_value_deltas(&mut self, changes: &[i64], delta_of_delta: bool, commit: bool) -> Vec<i64> {
        let mut prev = self.state.last_value;
        let mut prev_delta = self.state.last_value_delta;
        let mut out = Vec::with_capacity(changes.len());
        for &change in changes {
            let delta = if delta_of_delta {
                prev_delta.wrapping_add(change)
            } else {
                change
            };
            let v = prev.wrapping_add(delta);
            out.push(v);
            prev = v;
            prev_delta = delta;
        }
        if commit && !changes.is_empty() {
            self.state.last_value = prev;
            self.state.last_value_delta = prev_delta;
        }
        out
    }
}

/// Second differences of a first-difference stream, starting from
/// `prev_delta`.
pub fn delta_of_delta(deltas: &[i64], mut prev_delta: i64) -> Vec<i64> {
    deltas
        .iter()
        .map(|&d| {
            let dod = d.wrapping_sub(prev_delta);
            prev_delta = d;
            dod
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_deltas_invert() {
        let mut enc = DeltaContext::default();
        let mut dec = DeltaContext::default();
        let ts = vec![1000, 1100, 1200, 1300, 1450, i64::MIN, i64::MAX];
        let dods = enc.time_deltas(&ts);
        assert_eq!(&dods[..4], &[1000, -900, 0, 0]);
        assert_eq!(dec.apply_time_deltas(&dods, true), ts);
        assert_eq!(enc.state(), dec.state());
    }

    #[test]
    fn value_deltas_invert_in_both_forms() {
        let mut enc = DeltaContext::default();
        let values = vec![10, 13, 16, 19, 5];
        let base = enc.state();
        let deltas = enc.value_deltas(&values);
        assert_eq!(deltas, vec![10, 3, 3, 3, -14]);

        let mut dec = DeltaContext::default();
        assert_eq!(dec.apply_value_deltas(&deltas, false, true), values);
        assert_eq!(dec.state(), enc.state());

        let dods = delta_of_delta(&deltas, base.last_value_delta);
        let mut dec = DeltaContext::default();
        assert_eq!(dec.apply_value_deltas(&dods, true, true), values);
        assert_eq!(dec.state(), enc.state());
    }

    #[test]
    fn uncommitted_apply_leaves_state() {
        let mut ctx = DeltaContext::default();
        ctx.apply_time_deltas(&[5, 5], true);
        let before = ctx.state();
        let out = ctx.apply_time_deltas(&[1, 2, 3], false);
        assert_eq!(out.len(), 3);
        assert_eq!(ctx.state(), before);
    }

    #[test]
    fn abort_reverts_scalars_and_dictionary() {
        let mut ctx = DeltaContext::with_dictionary();
        ctx.value_deltas(&[1, 2]);
        ctx.dictionary_mut().unwrap().insert(7);
        let cp = ctx.begin();
        ctx.value_deltas(&[100, 200]);
        ctx.dictionary_mut().unwrap().insert(8);
        ctx.abort(cp);
        assert_eq!(ctx.state().last_value, 2);
        let dict = ctx.dictionary_mut().unwrap();
        assert_eq!(dict.lookup(7), Some(0));
        assert_eq!(dict.lookup(8), None);
    }

    #[test]
    fn commit_keeps_changes() {
        let mut ctx = DeltaContext::without_dictionary();
        let cp = ctx.begin();
        ctx.time_deltas(&[10, 20]);
        ctx.commit(cp);
        assert_eq!(ctx.state().last_timestamp, 20);
        assert_eq!(ctx.state().last_timestamp_delta, 10);
    }

    #[test]
    fn snapshot_restore_scalars() {
        let mut ctx = DeltaContext::default();
        let snap = ctx.snapshot();
        ctx.time_deltas(&[3, 9]);
        ctx.restore(snap);
        assert_eq!(ctx.state(), DeltaState::default());
    }

    #[test]
    fn recency_dictionary_overwrites_oldest() {
        let mut dict = RecencyDictionary::new(3);
        assert!(dict.is_empty());
        for v in [10, 20, 30] {
            dict.insert(v);
        }
        dict.insert(40);
        assert_eq!(dict.lookup(10), None);
        assert_eq!(dict.lookup(40), Some(0));
        dict.insert(50);
        assert_eq!(dict.lookup(20), None);
        assert_eq!(dict.get(1), Some(50));
        assert_eq!(dict.len(), 3);
    }
}
