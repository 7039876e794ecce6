use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    error::{Error, ErrorCode, Result},
    storage::{engine::Engine, keycode},
};

/// Transaction version number type
pub type Version = u64;

/// MVCC storage engine wrapper
///
/// Uses the underlying storage engine (Engine trait) for CRUD operations.
/// Every transaction reads a snapshot: versions committed before it began plus
/// its own writes. Writing a key that a concurrent transaction has written is a
/// write conflict, reported as `ErrorCode::Busy`.
pub struct Mvcc<E: Engine> {
    engine: Arc<Mutex<E>>,
}

impl<E: Engine> Clone for Mvcc<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<E: Engine> Mvcc<E> {
    pub fn new(eng: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(eng)),
        }
    }

    pub fn begin(&self) -> Result<MvccTransaction<E>> {
        MvccTransaction::begin(self.engine.clone())
    }

    /// Versions of transactions that have begun but not yet committed or rolled back
    pub fn active_versions(&self) -> Result<HashSet<Version>> {
        let mut engine = self.engine.lock()?;
        MvccTransaction::<E>::scan_active(&mut engine)
    }

    pub fn flush(&self) -> Result<()> {
        self.engine.lock()?.flush()
    }
}

/// MVCC transaction
pub struct MvccTransaction<E: Engine> {
    engine: Arc<Mutex<E>>,
    state: TransactionState,
}

/// Transaction state for MVCC visibility checks
pub struct TransactionState {
    pub version: Version,
    pub active_versions: HashSet<Version>,
}

impl TransactionState {
    fn is_visible(&self, version: Version) -> bool {
        if self.active_versions.contains(&version) {
            return false;
        }
        version <= self.version
    }
}

/// MVCC key types for storage operations
///
/// The first byte is the variant tag, the rest is keycode-encoded so that all
/// versions of one key are adjacent and sorted by version.
#[derive(Debug, PartialEq)]
pub enum MvccKey {
    /// Next version counter
    NextVersion,
    /// Active transaction marker
    TxnActive(Version),
    /// Write set entry for rollback
    TxnWrite(Version, Vec<u8>),
    /// Versioned data key
    Version(Vec<u8>, Version),
}

impl MvccKey {
    /// Serializes the key to bytes for storage
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            MvccKey::NextVersion => out.push(0x00),
            MvccKey::TxnActive(version) => {
                out.push(0x01);
                keycode::encode_u64(&mut out, *version);
            }
            MvccKey::TxnWrite(version, key) => {
                out.push(0x02);
                keycode::encode_u64(&mut out, *version);
                keycode::encode_bytes(&mut out, key);
            }
            MvccKey::Version(key, version) => {
                out.push(0x03);
                keycode::encode_bytes(&mut out, key);
                keycode::encode_u64(&mut out, *version);
            }
        }
        out
    }

    /// Deserializes bytes back to a key
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((tag, mut rest)) = data.split_first() else {
            return Err(Error::engine(ErrorCode::Corrupt, "empty mvcc key"));
        };
        let key = match tag {
            0x00 => MvccKey::NextVersion,
            0x01 => MvccKey::TxnActive(keycode::decode_u64(&mut rest)?),
            0x02 => {
                let version = keycode::decode_u64(&mut rest)?;
                MvccKey::TxnWrite(version, keycode::decode_bytes(&mut rest)?)
            }
            0x03 => {
                let key = keycode::decode_bytes(&mut rest)?;
                MvccKey::Version(key, keycode::decode_u64(&mut rest)?)
            }
            tag => {
                return Err(Error::engine(
                    ErrorCode::Corrupt,
                    format!("unknown mvcc key tag {}", tag),
                ));
            }
        };
        if !rest.is_empty() {
            return Err(Error::engine(ErrorCode::Corrupt, "trailing bytes in mvcc key"));
        }
        Ok(key)
    }
}

/// MVCC key prefix types for prefix scanning
///
/// Tags line up with the MvccKey variants.
#[derive(Debug)]
pub enum MvccKeyPrefix {
    TxnActive,
    TxnWrite(Version),
    Version(Vec<u8>),
}

impl MvccKeyPrefix {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            MvccKeyPrefix::TxnActive => out.push(0x01),
            MvccKeyPrefix::TxnWrite(version) => {
                out.push(0x02);
                keycode::encode_u64(&mut out, *version);
            }
            MvccKeyPrefix::Version(prefix) => {
                out.push(0x03);
                keycode::encode_bytes(&mut out, prefix);
                // drop the terminator so longer keys still match
                out.truncate(out.len() - 2);
            }
        }
        out
    }
}

impl<E: Engine> MvccTransaction<E> {
    /// Begins a new transaction
    pub fn begin(eng: Arc<Mutex<E>>) -> Result<Self> {
        let mut engine = eng.lock()?;

        let next_version = match engine.get(MvccKey::NextVersion.encode())? {
            Some(value) => bincode::deserialize(&value)?,
            None => 1,
        };

        engine.set(
            MvccKey::NextVersion.encode(),
            bincode::serialize(&(next_version + 1))?,
        )?;

        let active_versions = Self::scan_active(&mut engine)?;

        engine.set(MvccKey::TxnActive(next_version).encode(), vec![])?;
        drop(engine);

        tracing::trace!(version = next_version, active = active_versions.len(), "begin transaction");
        Ok(Self {
            engine: eng,
            state: TransactionState {
                version: next_version,
                active_versions,
            },
        })
    }

    pub fn version(&self) -> Version {
        self.state.version
    }

    /// Commits the transaction (cleans up metadata only)
    pub fn commit(&self) -> Result<()> {
        let mut engine = self.engine.lock()?;

        let mut delete_keys = Vec::new();
        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnWrite(self.state.version).encode());
        while let Some((key, _)) = iter.next().transpose()? {
            delete_keys.push(key);
        }
        drop(iter);

        for key in delete_keys.into_iter() {
            engine.delete(key)?;
        }

        tracing::trace!(version = self.state.version, "commit transaction");
        engine.delete(MvccKey::TxnActive(self.state.version).encode())
    }

    /// Rolls back the transaction (deletes all data and metadata)
    pub fn rollback(&self) -> Result<()> {
        let mut engine = self.engine.lock()?;
        let mut delete_keys = Vec::new();

        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnWrite(self.state.version).encode());
        while let Some((key, _)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::TxnWrite(_, raw_key) => {
                    delete_keys.push(MvccKey::Version(raw_key, self.state.version).encode());
                }
                other => return Err(unexpected_key(other)),
            }
            delete_keys.push(key);
        }
        drop(iter);

        for key in delete_keys.into_iter() {
            engine.delete(key)?;
        }

        tracing::trace!(version = self.state.version, "rollback transaction");
        engine.delete(MvccKey::TxnActive(self.state.version).encode())
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.write_inner(key, Some(value))
    }

    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        self.write_inner(key, None)
    }

    /// Gets the value for a key respecting MVCC visibility
    pub fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let mut engine = self.engine.lock()?;

        let from = MvccKey::Version(key.clone(), 0).encode();
        let to = MvccKey::Version(key, self.state.version).encode();
        let mut iter = engine.scan(from..=to).rev();

        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::Version(_, version) => {
                    if self.state.is_visible(version) {
                        return Ok(bincode::deserialize(&value)?);
                    }
                }
                other => return Err(unexpected_key(other)),
            }
        }
        Ok(None)
    }

    /// Scans keys with prefix, returning latest visible version per key
    pub fn scan_prefix(&self, prefix: Vec<u8>) -> Result<Vec<ScanResult>> {
        let mut eng = self.engine.lock()?;
        let enc_prefix = MvccKeyPrefix::Version(prefix).encode();

        let mut iter = eng.scan_prefix(enc_prefix);
        let mut results = BTreeMap::new();
        while let Some((key, value)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::Version(raw_key, version) => {
                    if self.state.is_visible(version) {
                        match bincode::deserialize(&value)? {
                            Some(raw_value) => results.insert(raw_key, raw_value),
                            None => results.remove(&raw_key),
                        };
                    }
                }
                other => return Err(unexpected_key(other)),
            }
        }

        Ok(results
            .into_iter()
            .map(|(key, value)| ScanResult { key, value })
            .collect())
    }

    fn write_inner(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<()> {
        let mut engine = self.engine.lock()?;

        // Conflict detection: any version newer than the oldest transaction we
        // cannot see must be visible to us
        let from = MvccKey::Version(
            key.clone(),
            self.state
                .active_versions
                .iter()
                .min()
                .copied()
                .unwrap_or(self.state.version + 1),
        )
        .encode();
        let to = MvccKey::Version(key.clone(), u64::MAX).encode();

        if let Some((k, _)) = engine.scan(from..=to).last().transpose()? {
            match MvccKey::decode(&k)? {
                MvccKey::Version(_, version) => {
                    if !self.state.is_visible(version) {
                        tracing::debug!(version = self.state.version, conflict = version, "write conflict");
                        return Err(Error::engine(
                            ErrorCode::Busy,
                            "write conflict with a concurrent transaction, retry",
                        ));
                    }
                }
                other => return Err(unexpected_key(other)),
            }
        }

        engine.set(
            MvccKey::TxnWrite(self.state.version, key.clone()).encode(),
            vec![],
        )?;

        engine.set(
            MvccKey::Version(key, self.state.version).encode(),
            bincode::serialize(&value)?,
        )?;

        Ok(())
    }

    fn scan_active(engine: &mut MutexGuard<E>) -> Result<HashSet<Version>> {
        let mut active_versions = HashSet::new();
        let mut iter = engine.scan_prefix(MvccKeyPrefix::TxnActive.encode());

        while let Some((key, _)) = iter.next().transpose()? {
            match MvccKey::decode(&key)? {
                MvccKey::TxnActive(version) => {
                    active_versions.insert(version);
                }
                other => return Err(unexpected_key(other)),
            }
        }
        Ok(active_versions)
    }
}

fn unexpected_key(key: MvccKey) -> Error {
    Error::engine(ErrorCode::Corrupt, format!("unexpected mvcc key {:?}", key))
}

/// Scan result containing key-value pair
#[derive(Debug, PartialEq)]
pub struct ScanResult {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{
        error::{ErrorCode, Result},
        storage::memory::MemoryEngine,
    };

    use super::{Mvcc, MvccKey};

    fn assert_busy(result: Result<()>) {
        match result {
            Err(err) => assert_eq!(err.code(), Some(ErrorCode::Busy)),
            Ok(()) => panic!("expected a write conflict"),
        }
    }

    #[test]
    fn test_key_encoding() -> Result<()> {
        for key in [
            MvccKey::NextVersion,
            MvccKey::TxnActive(7),
            MvccKey::TxnWrite(7, vec![0x00, 0x01]),
            MvccKey::Version(b"users".to_vec(), u64::MAX),
        ] {
            assert_eq!(MvccKey::decode(&key.encode())?, key);
        }

        // all versions of a key sort together and by version
        let a1 = MvccKey::Version(b"a".to_vec(), 1).encode();
        let a2 = MvccKey::Version(b"a".to_vec(), 256).encode();
        let ab = MvccKey::Version(b"ab".to_vec(), 0).encode();
        assert!(a1 < a2 && a2 < ab);
        Ok(())
    }

    #[test]
    fn test_active_versions() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx1 = mvcc.begin()?;
        let tx2 = mvcc.begin()?;
        assert_eq!(mvcc.active_versions()?.len(), 2);

        tx1.commit()?;
        tx2.rollback()?;
        assert!(mvcc.active_versions()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_snapshot_reads() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let setup = mvcc.begin()?;
        setup.set(b"a".to_vec(), b"1".to_vec())?;
        setup.set(b"b".to_vec(), b"1".to_vec())?;
        setup.commit()?;

        let writer = mvcc.begin()?;
        writer.set(b"a".to_vec(), b"2".to_vec())?;
        let reader = mvcc.begin()?;
        let late = mvcc.begin()?;
        late.delete(b"b".to_vec())?;
        late.set(b"c".to_vec(), b"3".to_vec())?;
        late.commit()?;
        writer.commit()?;

        // neither the uncommitted nor the later commits are visible
        assert_eq!(reader.get(b"a".to_vec())?, Some(b"1".to_vec()));
        assert_eq!(reader.get(b"b".to_vec())?, Some(b"1".to_vec()));
        assert_eq!(reader.get(b"c".to_vec())?, None);
        reader.commit()?;

        let after = mvcc.begin()?;
        assert_eq!(after.get(b"a".to_vec())?, Some(b"2".to_vec()));
        assert_eq!(after.get(b"b".to_vec())?, None);
        assert_eq!(after.get(b"c".to_vec())?, Some(b"3".to_vec()));
        Ok(())
    }

    #[test]
    fn test_scan_prefix_with_zero_bytes() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx = mvcc.begin()?;
        tx.set(vec![0x01, 0x00], b"x".to_vec())?;
        tx.set(vec![0x01, 0x00, 0xff], b"y".to_vec())?;
        tx.set(vec![0x01, 0x01], b"z".to_vec())?;
        tx.set(vec![0x02], b"w".to_vec())?;
        tx.delete(vec![0x01, 0x01])?;
        tx.commit()?;

        let tx = mvcc.begin()?;
        let keys = |prefix: Vec<u8>| -> Result<Vec<Vec<u8>>> {
            Ok(tx.scan_prefix(prefix)?.into_iter().map(|r| r.key).collect())
        };
        assert_eq!(keys(vec![0x01])?, vec![vec![0x01, 0x00], vec![0x01, 0x00, 0xff]]);
        assert_eq!(keys(vec![0x01, 0x00])?, vec![vec![0x01, 0x00], vec![0x01, 0x00, 0xff]]);
        assert_eq!(keys(vec![])?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_write_conflict_is_busy() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx1 = mvcc.begin()?;
        let tx2 = mvcc.begin()?;
        tx1.set(b"key".to_vec(), b"1".to_vec())?;
        assert_busy(tx2.set(b"key".to_vec(), b"2".to_vec()));
        assert_busy(tx2.delete(b"key".to_vec()));
        tx1.commit()?;

        // still a conflict: tx1 committed after tx2 began
        assert_busy(tx2.set(b"key".to_vec(), b"2".to_vec()));
        tx2.rollback()?;

        let tx3 = mvcc.begin()?;
        tx3.set(b"key".to_vec(), b"3".to_vec())?;
        tx3.commit()?;
        Ok(())
    }

    #[test]
    fn test_rollback_discards_writes() -> Result<()> {
        let mvcc = Mvcc::new(MemoryEngine::new());
        let tx = mvcc.begin()?;
        tx.set(b"key".to_vec(), b"1".to_vec())?;
        tx.commit()?;

        let tx1 = mvcc.begin()?;
        tx1.set(b"key".to_vec(), b"2".to_vec())?;
        tx1.set(b"other".to_vec(), b"2".to_vec())?;
        tx1.rollback()?;
        assert!(mvcc.active_versions()?.is_empty());

        // the rolled back version is gone, so the key is writable again
        let tx2 = mvcc.begin()?;
        assert_eq!(tx2.get(b"key".to_vec())?, Some(b"1".to_vec()));
        assert_eq!(tx2.get(b"other".to_vec())?, None);
        tx2.set(b"key".to_vec(), b"3".to_vec())?;
        tx2.commit()?;
        Ok(())
    }
}
