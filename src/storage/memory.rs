use std::{
    collections::{BTreeMap, btree_map},
    ops::RangeBounds,
};

use crate::{
    config::Config,
    error::Result,
    storage::engine::{Engine, EngineIterator, Open},
};

/// Storage engine keeping every key in an ordered map
///
/// Nothing is persisted. A database built on it keeps its rows until the
/// database and all of its handles are dropped.
#[derive(Default)]
pub struct MemoryEngine {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Open for MemoryEngine {
    fn open(_config: &Config) -> Result<Self> {
        Ok(Self::new())
    }
}

impl Engine for MemoryEngine {
    type EngineIterator<'a> = MemoryEngineIterator<'a>;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.data.insert(key, value);
        Ok(())
    }

    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(&key).cloned())
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        self.data.remove(&key);
        Ok(())
    }

    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_> {
        MemoryEngineIterator(self.data.range(range))
    }
}

/// Owned key/value pairs over a range of the map
pub struct MemoryEngineIterator<'a>(btree_map::Range<'a, Vec<u8>, Vec<u8>>);

fn owned((key, value): (&Vec<u8>, &Vec<u8>)) -> Result<(Vec<u8>, Vec<u8>)> {
    Ok((key.clone(), value.clone()))
}

impl Iterator for MemoryEngineIterator<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(owned)
    }
}

impl DoubleEndedIterator for MemoryEngineIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.0.next_back().map(owned)
    }
}

impl EngineIterator for MemoryEngineIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::MemoryEngine;
    use crate::{error::Result, storage::engine::Engine};

    #[test]
    fn test_scan_both_ends() -> Result<()> {
        let mut engine = MemoryEngine::new();
        for key in [b"a", b"b", b"c", b"d"] {
            engine.set(key.to_vec(), key.to_vec())?;
        }
        let mut iter = engine.scan(b"b".to_vec()..);
        assert_eq!(iter.next().transpose()?, Some((b"b".to_vec(), b"b".to_vec())));
        assert_eq!(iter.next_back().transpose()?, Some((b"d".to_vec(), b"d".to_vec())));
        assert_eq!(iter.next().transpose()?, Some((b"c".to_vec(), b"c".to_vec())));
        assert!(iter.next_back().is_none());
        Ok(())
    }
}
