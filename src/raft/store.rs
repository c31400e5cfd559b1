use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::proto::LogEntry;

/// Durable storage for the ordered entry sequence.
///
/// `append` and `truncate_after` must reach durable storage before returning
/// success; `load` recovers the full sequence at startup.
pub trait LogStore: Send + Sync {
    fn append(&mut self, entry: &LogEntry) -> io::Result<()>;
    fn truncate_after(&mut self, index: u64) -> io::Result<()>;
    fn load(&mut self) -> io::Result<Vec<LogEntry>>;
    fn flush(&mut self) -> io::Result<()>;
}

/// File-backed log store.
///
/// Entries are stored as length-delimited protobuf frames. Frame start
/// offsets are kept in memory so `truncate_after` is a single `set_len`.
/// Recovery scans from the start of the file and drops a trailing partial
/// frame (the tail of an interrupted append).
pub struct FileLogStore {
    file: File,
    path: PathBuf,
    // (entry index, frame start offset), parallel to the stored sequence
    offsets: Vec<(u64, u64)>,
    end: u64,
}

impl FileLogStore {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            offsets: Vec::new(),
            end: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for FileLogStore {
    fn append(&mut self, entry: &LogEntry) -> io::Result<()> {
        let frame = entry.encode_length_delimited_to_vec();
        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.offsets.push((entry.index, self.end));
        self.end += frame.len() as u64;
        Ok(())
    }

    fn truncate_after(&mut self, index: u64) -> io::Result<()> {
        let Some(pos) = self.offsets.iter().position(|(i, _)| *i > index) else {
            return Ok(());
        };
        let new_end = self.offsets[pos].1;
        self.file.set_len(new_end)?;
        self.file.sync_data()?;
        self.offsets.truncate(pos);
        self.end = new_end;
        Ok(())
    }

    fn load(&mut self) -> io::Result<Vec<LogEntry>> {
        let mut raw = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut raw)?;

        let mut entries = Vec::new();
        self.offsets.clear();
        let mut offset = 0u64;
        let mut slice: &[u8] = &raw;
        while !slice.is_empty() {
            let before = slice.len();
            match LogEntry::decode_length_delimited(&mut slice) {
                Ok(entry) => {
                    self.offsets.push((entry.index, offset));
                    offset += (before - slice.len()) as u64;
                    entries.push(entry);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        offset,
                        error = %e,
                        "Dropping partial trailing frame from log file"
                    );
                    self.file.set_len(offset)?;
                    self.file.sync_data()?;
                    break;
                }
            }
        }
        self.end = offset;
        Ok(entries)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }
}

/// In-memory log store, used by unit tests and by servers before `init`
/// swaps in the file-backed store.
#[derive(Default)]
pub struct MemoryLogStore {
    entries: Vec<LogEntry>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, entry: &LogEntry) -> io::Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn truncate_after(&mut self, index: u64) -> io::Result<()> {
        self.entries.retain(|e| e.index <= index);
        Ok(())
    }

    fn load(&mut self) -> io::Result<Vec<LogEntry>> {
        Ok(self.entries.clone())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Server metadata persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub current_term: u64,
    pub voted_for_term: u64,
    pub commit_index: u64,
}

/// Atomic reader/writer for the metadata file under the server data
/// directory. Writes go to a temp file, are synced, then renamed over the
/// target.
pub struct StateFile {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl StateFile {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("state.json"),
            tmp_path: dir.join("state.json.tmp"),
        }
    }

    pub fn save(&self, state: &PersistedState) -> io::Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(&self.tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    pub fn load(&self) -> io::Result<PersistedState> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry {
            index,
            term,
            command_name: "nop".to_string(),
            command: Vec::new(),
        }
    }

    #[test]
    fn test_file_store_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raftlog.n1");

        let mut store = FileLogStore::open(&path).unwrap();
        assert!(store.load().unwrap().is_empty());
        store.append(&entry(1, 1)).unwrap();
        store.append(&entry(2, 1)).unwrap();
        store.append(&entry(3, 2)).unwrap();
        drop(store);

        let mut store = FileLogStore::open(&path).unwrap();
        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], entry(1, 1));
        assert_eq!(entries[2], entry(3, 2));
    }

    #[test]
    fn test_file_store_truncate_after() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raftlog.n1");

        let mut store = FileLogStore::open(&path).unwrap();
        store.load().unwrap();
        for i in 1..=4 {
            store.append(&entry(i, 1)).unwrap();
        }
        store.truncate_after(2).unwrap();
        // append after truncation lands where entry 3 used to be
        store.append(&entry(3, 2)).unwrap();
        drop(store);

        let mut store = FileLogStore::open(&path).unwrap();
        let entries = store.load().unwrap();
        assert_eq!(
            entries.iter().map(|e| (e.index, e.term)).collect::<Vec<_>>(),
            vec![(1, 1), (2, 1), (3, 2)]
        );
    }

    #[test]
    fn test_file_store_truncate_after_last_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raftlog.n1");

        let mut store = FileLogStore::open(&path).unwrap();
        store.load().unwrap();
        store.append(&entry(1, 1)).unwrap();
        store.truncate_after(5).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_drops_partial_trailing_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raftlog.n1");

        let mut store = FileLogStore::open(&path).unwrap();
        store.load().unwrap();
        store.append(&entry(1, 1)).unwrap();
        store.append(&entry(2, 1)).unwrap();
        drop(store);

        // simulate an interrupted append: a frame header with missing body
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[200, 1, 8, 3]).unwrap();
        drop(file);

        let mut store = FileLogStore::open(&path).unwrap();
        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 2);

        // the corrupt tail was truncated away, so new appends survive a reload
        store.append(&entry(3, 1)).unwrap();
        drop(store);
        let mut store = FileLogStore::open(&path).unwrap();
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryLogStore::new();
        store.append(&entry(1, 1)).unwrap();
        store.append(&entry(2, 1)).unwrap();
        store.truncate_after(1).unwrap();
        assert_eq!(store.load().unwrap(), vec![entry(1, 1)]);
    }

    #[test]
    fn test_state_file_roundtrip_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = StateFile::new(dir.path());

        assert_eq!(state_file.load().unwrap(), PersistedState::default());

        let state = PersistedState {
            current_term: 7,
            voted_for_term: 7,
            commit_index: 42,
        };
        state_file.save(&state).unwrap();
        assert_eq!(state_file.load().unwrap(), state);
    }
}
