use std::io;

use crate::error::{RegistryError, Result};
use crate::proto::LogEntry;
use crate::raft::store::{LogStore, MemoryLogStore};

/// The replicated log: an in-memory entry vector mirrored by a durable
/// store, plus the commit index.
///
/// Indices are contiguous starting at 1; index 0 is the implicit empty
/// predecessor. The commit index never exceeds the last entry's index and
/// never retreats.
pub struct Log {
    entries: Vec<LogEntry>,
    commit_index: u64,
    store: Box<dyn LogStore>,
}

impl Log {
    /// Open a log over a store, recovering the persisted entry sequence.
    pub fn open(mut store: Box<dyn LogStore>) -> Result<Self> {
        let entries = store.load()?;
        for (i, entry) in entries.iter().enumerate() {
            if entry.index != i as u64 + 1 {
                return Err(RegistryError::Storage(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "recovered log not contiguous: entry {} at position {}",
                        entry.index, i
                    ),
                )));
            }
        }
        Ok(Self {
            entries,
            commit_index: 0,
            store,
        })
    }

    /// A log over a throwaway in-memory store.
    pub fn volatile() -> Self {
        Self {
            entries: Vec::new(),
            commit_index: 0,
            store: Box::new(MemoryLogStore::new()),
        }
    }

    /// Append one entry at the tail. Its index must be exactly
    /// `last_index + 1`; the entry is durable when this returns `Ok`.
    pub fn append(&mut self, entry: LogEntry) -> Result<()> {
        let expected = self.last_index() + 1;
        if entry.index != expected {
            return Err(RegistryError::LogIndexGap {
                given: entry.index,
                expected,
            });
        }
        self.store.append(&entry)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Drop all entries with index greater than `index`.
    pub fn truncate_after(&mut self, index: u64) -> Result<()> {
        if index >= self.last_index() {
            return Ok(());
        }
        self.store.truncate_after(index)?;
        self.entries.retain(|e| e.index <= index);
        Ok(())
    }

    /// `(last_index, last_term)`, or `(0, 0)` when the log is empty.
    pub fn last_log_info(&self) -> (u64, u64) {
        self.entries
            .last()
            .map(|e| (e.index, e.term))
            .unwrap_or((0, 0))
    }

    pub fn last_index(&self) -> u64 {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    /// Advance the commit index towards `new_commit_index`, clamped to the
    /// last entry. The commit index never decreases.
    pub fn update_commit_index(&mut self, new_commit_index: u64) {
        let clamped = new_commit_index.min(self.last_index());
        if clamped > self.commit_index {
            self.commit_index = clamped;
        }
    }

    /// All entries with index strictly greater than `exclusive_index`, used
    /// by the leader to catch a follower up.
    pub fn entries_from(&self, exclusive_index: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.index > exclusive_index)
            .cloned()
            .collect()
    }

    pub fn entry_at(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    /// Highest index at which this log can accept entries following
    /// `(prev_log_index, prev_log_term)`: the latest entry below
    /// `prev_log_index`, or `prev_log_index` itself when the entry there
    /// carries the expected term. `None` when no entry qualifies.
    pub fn reconciliation_point(&self, prev_log_index: u64, prev_log_term: u64) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| {
                e.index < prev_log_index || (e.index == prev_log_index && e.term == prev_log_term)
            })
            .map(|e| e.index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()?;
        Ok(())
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

    fn log_with(entries: &[(u64, u64)]) -> Log {
        let mut log = Log::volatile();
        for &(i, t) in entries {
            log.append(entry(i, t)).unwrap();
        }
        log
    }

    #[test]
    fn test_empty_log_info() {
        let log = Log::volatile();
        assert_eq!(log.last_log_info(), (0, 0));
        assert_eq!(log.commit_index(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_enforces_contiguity() {
        let mut log = log_with(&[(1, 1)]);
        let err = log.append(entry(3, 1)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::LogIndexGap {
                given: 3,
                expected: 2
            }
        ));
        log.append(entry(2, 1)).unwrap();
        assert_eq!(log.last_log_info(), (2, 1));
    }

    #[test]
    fn test_commit_index_clamped_and_monotonic() {
        let mut log = log_with(&[(1, 1), (2, 1), (3, 1)]);

        // clamped to the last entry
        log.update_commit_index(10);
        assert_eq!(log.commit_index(), 3);

        // never retreats
        log.update_commit_index(1);
        assert_eq!(log.commit_index(), 3);
    }

    #[test]
    fn test_entries_from_is_exclusive() {
        let log = log_with(&[(1, 1), (2, 1), (3, 2)]);
        let tail = log.entries_from(1);
        assert_eq!(
            tail.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(log.entries_from(3).len(), 0);
        assert_eq!(log.entries_from(0).len(), 3);
    }

    #[test]
    fn test_truncate_after() {
        let mut log = log_with(&[(1, 1), (2, 1), (3, 2), (4, 2)]);
        log.truncate_after(2).unwrap();
        assert_eq!(log.last_log_info(), (2, 1));
        log.truncate_after(5).unwrap();
        assert_eq!(log.last_log_info(), (2, 1));
    }

    #[test]
    fn test_entry_at() {
        let log = log_with(&[(1, 1), (2, 2)]);
        assert!(log.entry_at(0).is_none());
        assert_eq!(log.entry_at(1).unwrap().term, 1);
        assert_eq!(log.entry_at(2).unwrap().term, 2);
        assert!(log.entry_at(3).is_none());
    }

    #[test]
    fn test_reconciliation_point() {
        let log = log_with(&[(1, 1), (2, 1), (3, 2)]);

        // exact tail match
        assert_eq!(log.reconciliation_point(3, 2), Some(3));
        // term mismatch at prev backs up below it
        assert_eq!(log.reconciliation_point(3, 1), Some(2));
        // prev inside the log
        assert_eq!(log.reconciliation_point(2, 1), Some(2));
        // heartbeat shape: nothing at or below index 0
        assert_eq!(log.reconciliation_point(0, 0), None);

        let empty = Log::volatile();
        assert_eq!(empty.reconciliation_point(0, 0), None);
    }
}
