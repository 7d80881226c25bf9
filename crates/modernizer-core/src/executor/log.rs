//! The operation log: the audit trail and sole input to rollback.
//!
//! Entries live in memory behind one mutex, so sequence numbers are a total
//! order. Every state change is also appended to a JSON-lines journal;
//! replaying the journal (last line per sequence wins) rebuilds the log
//! after a crash. The in-memory entries are authoritative: a change is
//! applied there first, so a failed journal write never loses track of
//! what was done on disk.

use crate::{ModernizerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::fmt::Debug;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Mkdir,
    Copy,
    /// Copy now, delete the source once the whole run has succeeded.
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pending,
    Success,
    Failed,
    RolledBack,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub sequence: u64,
    pub kind: OperationKind,
    /// Absent for MKDIR.
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    /// BLAKE3 of the verified content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// MOVE only: the source has been deleted.
    #[serde(default)]
    pub source_removed: bool,
}

/// Destination of journal lines.
pub trait JournalSink: Send + Debug {
    /// Write one line durably.
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

impl JournalSink for File {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self, "{}", line)?;
        self.sync_data()
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<OperationLogEntry>,
    journal: Option<Box<dyn JournalSink>>,
    journal_path: Option<PathBuf>,
}

/// Append-only operation log with an optional on-disk journal.
#[derive(Debug, Default)]
pub struct OperationLog {
    state: Mutex<LogState>,
}

impl OperationLog {
    /// An in-memory log (dry runs, tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that journals every change to `path`, truncating any previous
    /// journal.
    pub fn with_journal(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ModernizerError::io_with_path(e, parent))?;
        }
        let journal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ModernizerError::io_with_path(e, path))?;
        Ok(Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                journal: Some(Box::new(journal)),
                journal_path: Some(path.to_path_buf()),
            }),
        })
    }

    /// A log that journals every change to an arbitrary sink.
    pub fn with_sink(sink: Box<dyn JournalSink>) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                journal: Some(sink),
                journal_path: None,
            }),
        }
    }

    /// Rebuild a log from a journal; the latest line per sequence wins.
    ///
    /// Further changes are appended to the same journal. A torn last line
    /// from a crash is skipped with a warning.
    pub fn replay(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ModernizerError::io_with_path(e, path))?;
        let mut entries: Vec<OperationLogEntry> = Vec::new();
        let mut torn = false;
        for (number, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(|e| ModernizerError::io_with_path(e, path))?;
            let line = String::from_utf8_lossy(&line);
            if line.trim().is_empty() {
                continue;
            }
            let entry: OperationLogEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    torn = true;
                    warn!("Skipping unreadable journal line {} in {}: {}", number + 1, path.display(), e);
                    continue;
                }
            };
            match entries.iter_mut().find(|x| x.sequence == entry.sequence) {
                Some(existing) => *existing = entry,
                None => entries.push(entry),
            }
        }
        entries.sort_by_key(|e| e.sequence);

        let mut journal = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| ModernizerError::io_with_path(e, path))?;
        if torn {
            // Terminate a partial line so new entries start clean.
            writeln!(journal).map_err(|e| ModernizerError::io_with_path(e, path))?;
        }
        debug!("Replayed {} operations from {}", entries.len(), path.display());
        Ok(Self {
            state: Mutex::new(LogState {
                entries,
                journal: Some(Box::new(journal)),
                journal_path: Some(path.to_path_buf()),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a new entry and return its sequence number.
    ///
    /// On a journal error the entry is still kept in memory.
    pub fn append(
        &self,
        kind: OperationKind,
        source: Option<PathBuf>,
        destination: PathBuf,
        outcome: Outcome,
    ) -> Result<u64> {
        let mut state = self.lock();
        let sequence = state.entries.len() as u64 + 1;
        let entry = OperationLogEntry {
            sequence,
            kind,
            source,
            destination,
            outcome,
            timestamp: Utc::now(),
            checksum: None,
            error: None,
            source_removed: false,
        };
        state.entries.push(entry.clone());
        journal_entry(&mut state, &entry)?;
        Ok(sequence)
    }

    /// Change an entry in place and journal the new state.
    ///
    /// On a journal error the change is still applied in memory.
    pub fn update<F>(&self, sequence: u64, change: F) -> Result<()>
    where
        F: FnOnce(&mut OperationLogEntry),
    {
        let mut state = self.lock();
        let Some(index) = state.entries.iter().position(|e| e.sequence == sequence) else {
            return Err(ModernizerError::Other(format!(
                "no operation with sequence {}",
                sequence
            )));
        };
        let entry = &mut state.entries[index];
        change(entry);
        entry.timestamp = Utc::now();
        let entry = entry.clone();
        journal_entry(&mut state, &entry)
    }

    pub fn set_outcome(&self, sequence: u64, outcome: Outcome) -> Result<()> {
        self.update(sequence, |e| e.outcome = outcome)
    }

    /// Snapshot of every entry in sequence order.
    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.lock().entries.clone()
    }

    pub fn get(&self, sequence: u64) -> Option<OperationLogEntry> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.sequence == sequence)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.outcome == outcome)
            .count()
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.lock().journal_path.clone()
    }
}

fn journal_entry(state: &mut LogState, entry: &OperationLogEntry) -> Result<()> {
    let path = state.journal_path.clone();
    let Some(journal) = state.journal.as_mut() else {
        return Ok(());
    };
    let line = serde_json::to_string(entry)?;
    journal
        .write_line(&line)
        .map_err(|e| ModernizerError::Io {
            message: format!("Failed to append to journal: {}", e),
            path,
            source: Some(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_sequence_numbers_are_dense() {
        let log = OperationLog::new();
        let a = log
            .append(OperationKind::Mkdir, None, "Projects".into(), Outcome::Pending)
            .unwrap();
        let b = log
            .append(
                OperationKind::Copy,
                Some("/src/a.dwg".into()),
                "Projects/a.dwg".into(),
                Outcome::Pending,
            )
            .unwrap();
        assert_eq!((a, b), (1, 2));
        log.set_outcome(b, Outcome::Failed).unwrap();
        assert_eq!(log.count(Outcome::Failed), 1);
        assert!(log.set_outcome(9, Outcome::Success).is_err());
    }

    #[test]
    fn test_concurrent_appends_total_order() {
        let log = Arc::new(OperationLog::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        log.append(
                            OperationKind::Copy,
                            None,
                            format!("{}-{}", i, j).into(),
                            Outcome::Pending,
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let sequences: Vec<u64> = log.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=200).collect::<Vec<u64>>());
    }

    /// Accepts `remaining` lines, then fails every write.
    #[derive(Debug)]
    struct FullDisk {
        remaining: usize,
    }

    impl JournalSink for FullDisk {
        fn write_line(&mut self, _line: &str) -> io::Result<()> {
            if self.remaining == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            self.remaining -= 1;
            Ok(())
        }
    }

    #[test]
    fn test_memory_stays_authoritative_when_journal_fails() {
        let log = OperationLog::with_sink(Box::new(FullDisk { remaining: 1 }));
        let seq = log
            .append(OperationKind::Copy, Some("/s/a".into()), "t/a".into(), Outcome::Pending)
            .unwrap();

        let err = log.set_outcome(seq, Outcome::Success).unwrap_err();
        assert!(err.to_string().contains("journal"));
        assert_eq!(log.get(seq).unwrap().outcome, Outcome::Success);

        assert!(log
            .append(OperationKind::Mkdir, None, "t".into(), Outcome::Pending)
            .is_err());
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1].sequence, 2);
    }

    #[test]
    fn test_replay_keeps_latest_state() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("operations.jsonl");
        {
            let log = OperationLog::with_journal(&path).unwrap();
            let seq = log
                .append(OperationKind::Move, Some("/s/a".into()), "t/a".into(), Outcome::Pending)
                .unwrap();
            log.update(seq, |e| {
                e.outcome = Outcome::Success;
                e.checksum = Some("abc".into());
                e.source_removed = true;
            })
            .unwrap();
        }
        // A torn trailing line is ignored.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"sequence\": 2, \"ki").unwrap();
        drop(file);

        let log = OperationLog::replay(&path).unwrap();
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, Outcome::Success);
        assert_eq!(entries[0].checksum.as_deref(), Some("abc"));
        assert!(entries[0].source_removed);

        log.set_outcome(1, Outcome::RolledBack).unwrap();
        let again = OperationLog::replay(&path).unwrap();
        assert_eq!(again.entries()[0].outcome, Outcome::RolledBack);
    }
}
