use std::ops::{Bound, RangeBounds};

use crate::{config::Config, error::Result, storage::keycode};

/// Abstract storage engine interface (byte-level operations)
///
/// Different from sql::engine::Engine which operates on tables.
pub trait Engine {
    type EngineIterator<'a>: EngineIterator
    where
        Self: 'a;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()>;
    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>>;
    fn delete(&mut self, key: Vec<u8>) -> Result<()>;
    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_>;

    /// Prefix scan using lexicographic ordering
    ///
    /// The prefix "apple" becomes the range ["apple", "applf"). Trailing 0xff
    /// bytes are carried, and a prefix of only 0xff bytes scans to the end.
    fn scan_prefix(&mut self, prefix: Vec<u8>) -> Self::EngineIterator<'_> {
        let end = keycode::prefix_end(&prefix);
        self.scan((Bound::Included(prefix), end))
    }

    /// Persists buffered writes to durable storage
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Storage engine iterator trait (supports reverse traversal)
pub trait EngineIterator: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}

/// Storage engines that a database can open from its configuration
pub trait Open: Engine + Sized {
    fn open(config: &Config) -> Result<Self>;
}
