use std::{
    collections::{BTreeMap, btree_map},
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use crate::{
    config::Config,
    error::{Error, Result},
    storage::engine::{Engine, EngineIterator, Open},
};

/// Key directory: key -> (value position, value length) in the log file
type KeyDir = BTreeMap<Vec<u8>, (u64, u32)>;

/// Log-structured disk storage engine
///
/// Every write appends an entry to a single log file and the in-memory key
/// directory points at the latest value of each key. Entry layout:
///
/// ```text
/// [key_len: u32 BE][value_len: i32 BE, -1 for a tombstone][key][value]
/// ```
///
/// Replaced and deleted values stay in the file as garbage until `compact()`
/// rewrites the live entries into a fresh log.
pub struct DiskEngine {
    keydir: KeyDir,
    log: Log,
}

impl DiskEngine {
    /// Opens or creates the log at `path` and rebuilds the key directory
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let mut log = Log::new(path.into())?;
        let keydir = log.build_keydir()?;
        tracing::info!(path = %log.path.display(), keys = keydir.len(), "opened disk engine");
        Ok(Self { keydir, log })
    }

    /// Opens the log and compacts it when the garbage ratio reaches `threshold`
    pub fn new_compact(path: impl Into<PathBuf>, threshold: f64) -> Result<Self> {
        let mut engine = Self::new(path)?;
        let status = engine.status()?;
        if status.garbage_ratio() >= threshold && status.garbage_bytes > 0 {
            engine.compact()?;
        }
        Ok(engine)
    }

    pub fn status(&mut self) -> Result<Status> {
        let live_bytes = self
            .keydir
            .iter()
            .map(|(key, (_, len))| ENTRY_HEADER + key.len() as u64 + *len as u64)
            .sum::<u64>();
        let total_bytes = self.log.file.metadata()?.len();
        Ok(Status {
            keys: self.keydir.len(),
            live_bytes,
            total_bytes,
            garbage_bytes: total_bytes.saturating_sub(live_bytes),
        })
    }

    /// Rewrites the live entries into a new log and swaps it in place
    pub fn compact(&mut self) -> Result<()> {
        let mut tmp_path = self.log.path.clone();
        tmp_path.set_extension("compact");

        let mut new_log = Log::new(tmp_path)?;
        new_log.file.set_len(0)?;
        let mut new_keydir = KeyDir::new();
        for (key, (pos, len)) in self.keydir.iter() {
            let value = self.log.read_value(*pos, *len)?;
            let (pos, len) = new_log.write_entry(key, Some(&value))?;
            new_keydir.insert(key.clone(), (pos, len));
        }
        new_log.file.sync_all()?;

        std::fs::rename(&new_log.path, &self.log.path)?;
        new_log.path = self.log.path.clone();

        let before = self.log.file.metadata()?.len();
        self.log = new_log;
        self.keydir = new_keydir;
        tracing::info!(
            path = %self.log.path.display(),
            before,
            after = self.log.file.metadata()?.len(),
            "compacted disk engine"
        );
        Ok(())
    }
}

/// Space accounting of a disk engine
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub keys: usize,
    pub live_bytes: u64,
    pub total_bytes: u64,
    pub garbage_bytes: u64,
}

impl Status {
    pub fn garbage_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.garbage_bytes as f64 / self.total_bytes as f64
    }
}

impl Open for DiskEngine {
    fn open(config: &Config) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or(Error::Connection("disk engine requires a path".into()))?;
        match config.compact_threshold {
            Some(threshold) => Self::new_compact(path, threshold),
            None => Self::new(path),
        }
    }
}

impl Engine for DiskEngine {
    type EngineIterator<'a> = DiskEngineIterator<'a>;

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let (pos, len) = self.log.write_entry(&key, Some(&value))?;
        self.keydir.insert(key, (pos, len));
        Ok(())
    }

    fn get(&mut self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        match self.keydir.get(&key) {
            Some((pos, len)) => Ok(Some(self.log.read_value(*pos, *len)?)),
            None => Ok(None),
        }
    }

    fn delete(&mut self, key: Vec<u8>) -> Result<()> {
        if self.keydir.remove(&key).is_some() {
            self.log.write_entry(&key, None)?;
        }
        Ok(())
    }

    fn scan(&mut self, range: impl std::ops::RangeBounds<Vec<u8>>) -> Self::EngineIterator<'_> {
        DiskEngineIterator {
            inner: self.keydir.range(range),
            log: &mut self.log,
        }
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.log.file.sync_all()?)
    }
}

/// Disk storage engine iterator, reads values lazily from the log
pub struct DiskEngineIterator<'a> {
    inner: btree_map::Range<'a, Vec<u8>, (u64, u32)>,
    log: &'a mut Log,
}

impl<'a> DiskEngineIterator<'a> {
    fn map(&mut self, item: (&Vec<u8>, &(u64, u32))) -> Result<(Vec<u8>, Vec<u8>)> {
        let (key, (pos, len)) = item;
        Ok((key.clone(), self.log.read_value(*pos, *len)?))
    }
}

impl<'a> EngineIterator for DiskEngineIterator<'a> {}

impl<'a> Iterator for DiskEngineIterator<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(self.map(item))
    }
}

impl<'a> DoubleEndedIterator for DiskEngineIterator<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let item = self.inner.next_back()?;
        Some(self.map(item))
    }
}

/// Size of the fixed entry header: key length + value length
const ENTRY_HEADER: u64 = 8;

/// Append-only log file
struct Log {
    path: PathBuf,
    file: File,
}

impl Log {
    fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Replays the log; a torn entry at the tail is truncated away
    fn build_keydir(&mut self) -> Result<KeyDir> {
        let file_len = self.file.metadata()?.len();
        let mut reader = BufReader::new(&mut self.file);
        reader.seek(SeekFrom::Start(0))?;

        let mut keydir = KeyDir::new();
        let mut pos = 0u64;
        let mut torn = None;
        let mut len_buf = [0u8; 4];
        while pos < file_len {
            // None when the header claims more bytes than the file holds
            let entry = (|| -> std::io::Result<Option<(Vec<u8>, Option<u32>)>> {
                reader.read_exact(&mut len_buf)?;
                let key_len = u32::from_be_bytes(len_buf);
                reader.read_exact(&mut len_buf)?;
                let value_len = match i32::from_be_bytes(len_buf) {
                    l if l >= 0 => Some(l as u32),
                    _ => None,
                };
                let end = pos + ENTRY_HEADER + key_len as u64 + value_len.unwrap_or(0) as u64;
                if end > file_len {
                    return Ok(None);
                }
                let mut key = vec![0; key_len as usize];
                reader.read_exact(&mut key)?;
                if let Some(value_len) = value_len {
                    reader.seek_relative(value_len as i64)?;
                }
                Ok(Some((key, value_len)))
            })();

            match entry {
                Ok(Some((key, value_len))) => {
                    let value_pos = pos + ENTRY_HEADER + key.len() as u64;
                    match value_len {
                        Some(value_len) => keydir.insert(key, (value_pos, value_len)),
                        None => keydir.remove(&key),
                    };
                    pos = value_pos + value_len.unwrap_or(0) as u64;
                }
                Ok(None) => {
                    torn = Some(pos);
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    torn = Some(pos);
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        drop(reader);

        if let Some(pos) = torn {
            tracing::warn!(path = %self.path.display(), pos, "truncating torn entry at end of log");
            self.file.set_len(pos)?;
        }
        Ok(keydir)
    }

    fn read_value(&mut self, pos: u64, len: u32) -> Result<Vec<u8>> {
        let mut value = vec![0; len as usize];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends an entry, returning the position and length of its value
    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(u64, u32)> {
        let key_len = key.len() as u32;
        let value_len = value.map_or(0, |v| v.len() as u32);
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::with_capacity(
            ENTRY_HEADER as usize + key.len() + value_len as usize,
            &mut self.file,
        );
        writer.write_all(&key_len.to_be_bytes())?;
        writer.write_all(&value_len_or_tombstone.to_be_bytes())?;
        writer.write_all(key)?;
        if let Some(value) = value {
            writer.write_all(value)?;
        }
        writer.flush()?;

        Ok((pos + ENTRY_HEADER + key_len as u64, value_len))
    }
}
