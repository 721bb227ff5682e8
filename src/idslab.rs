//! Id slab write-ahead log
//!
//! Durable bidirectional mapping between caller-supplied user ids and dense
//! matrix row positions, rebuilt by replaying a .wal file on open.
//!
//! # Record Format
//!
//! Fixed 25-byte records, little-endian, appended one per mutation:
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     1       u8          Op: 1 = INSERT, 2 = DELETE
//! 0x01     8       u64 LE      User id
//! 0x09     8       u64 LE      Auto id
//! 0x11     8       i64 LE      Row index (-1 for DELETE)
//! ─────────────────────────────────────────────
//! ```
//!
//! The auto id is an internal monotone counter that serves as the log's
//! stable handle: user ids can be deleted and re-inserted (receiving a fresh
//! auto id), while INSERT records carry the auto id assigned at the time, so
//! replay reproduces historical ordering exactly. The log is flushed after
//! every record and never rewrites prior bytes; a partial trailing record is
//! discarded silently during replay.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Size of one log record in bytes: op(1) + user(8) + auto(8) + row(8)
pub const RECORD_SIZE: usize = 25;

/// Sentinel row for deleted (or never-assigned) auto id slots
pub const TOMBSTONE: i64 = -1;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOp {
    Insert,
    Delete,
}

impl LogOp {
    fn to_byte(self) -> u8 {
        match self {
            LogOp::Insert => 1,
            LogOp::Delete => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(LogOp::Insert),
            2 => Some(LogOp::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogRecord {
    op: LogOp,
    user_id: u64,
    auto_id: u64,
    row_index: i64,
}

impl LogRecord {
    fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = self.op.to_byte();
        buf[1..9].copy_from_slice(&self.user_id.to_le_bytes());
        buf[9..17].copy_from_slice(&self.auto_id.to_le_bytes());
        buf[17..25].copy_from_slice(&self.row_index.to_le_bytes());
        buf
    }

    /// Returns `None` for an unknown op byte; the record is consumed but
    /// contributes nothing to replay state.
    fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Option<Self> {
        let op = LogOp::from_byte(bytes[0])?;
        Some(Self {
            op,
            user_id: u64::from_le_bytes(bytes[1..9].try_into().unwrap()),
            auto_id: u64::from_le_bytes(bytes[9..17].try_into().unwrap()),
            row_index: i64::from_le_bytes(bytes[17..25].try_into().unwrap()),
        })
    }
}

/// Replayable user-id → row mapping backed by a .wal file
pub struct IdSlab {
    log: BufWriter<File>,
    user_auto: HashMap<u64, u64>,
    auto_row: Vec<i64>,
    next_auto_id: u64,
}

impl IdSlab {
    /// Open a .wal file (creating it if absent), replay it, and position the
    /// write cursor at end-of-file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut slab = Self {
            log: BufWriter::new(file.try_clone()?),
            user_auto: HashMap::new(),
            auto_row: Vec::new(),
            next_auto_id: 0,
        };
        slab.replay(BufReader::new(file))?;
        Ok(slab)
    }

    /// Single forward pass over the log, applying complete records in order.
    fn replay<R: Read>(&mut self, mut reader: R) -> Result<(), LogError> {
        let mut buf = [0u8; RECORD_SIZE];
        loop {
            let filled = read_full(&mut reader, &mut buf)?;
            if filled == 0 {
                break;
            }
            if filled < RECORD_SIZE {
                tracing::warn!(bytes = filled, "discarding truncated trailing log record");
                break;
            }
            if let Some(record) = LogRecord::from_bytes(&buf) {
                self.apply(record);
            }
        }

        // Subsequent inserts must extend auto_row without colliding.
        if self.auto_row.len() as u64 > self.next_auto_id {
            self.next_auto_id = self.auto_row.len() as u64;
        }
        Ok(())
    }

    fn apply(&mut self, record: LogRecord) {
        match record.op {
            LogOp::Insert => {
                self.user_auto.insert(record.user_id, record.auto_id);
                let slot = record.auto_id as usize;
                if self.auto_row.len() <= slot {
                    self.auto_row.resize(slot + 1, TOMBSTONE);
                }
                self.auto_row[slot] = record.row_index;
                if record.auto_id >= self.next_auto_id {
                    self.next_auto_id = record.auto_id + 1;
                }
            }
            LogOp::Delete => {
                self.user_auto.remove(&record.user_id);
                if let Some(slot) = self.auto_row.get_mut(record.auto_id as usize) {
                    *slot = TOMBSTONE;
                }
            }
        }
    }

    /// Map `user_id` to `row_index`, assigning and returning a fresh auto id.
    ///
    /// Returns `Ok(None)` if the user id is already mapped: the insert is
    /// skipped with no side effects and no log growth.
    pub fn insert(&mut self, user_id: u64, row_index: i64) -> Result<Option<u64>, LogError> {
        if self.user_auto.contains_key(&user_id) {
            return Ok(None);
        }

        let auto_id = self.next_auto_id;
        self.next_auto_id += 1;

        let slot = auto_id as usize;
        if self.auto_row.len() <= slot {
            self.auto_row.resize(slot + 1, TOMBSTONE);
        }
        self.auto_row[slot] = row_index;
        self.user_auto.insert(user_id, auto_id);

        self.append_record(LogRecord {
            op: LogOp::Insert,
            user_id,
            auto_id,
            row_index,
        })?;
        Ok(Some(auto_id))
    }

    /// Unmap `user_id`, tombstoning its auto id slot.
    ///
    /// Removing an absent user id is a silent no-op and writes no record.
    pub fn remove(&mut self, user_id: u64) -> Result<(), LogError> {
        let Some(auto_id) = self.user_auto.remove(&user_id) else {
            return Ok(());
        };

        if let Some(slot) = self.auto_row.get_mut(auto_id as usize) {
            *slot = TOMBSTONE;
        }

        self.append_record(LogRecord {
            op: LogOp::Delete,
            user_id,
            auto_id,
            row_index: TOMBSTONE,
        })
    }

    fn append_record(&mut self, record: LogRecord) -> Result<(), LogError> {
        self.log.write_all(&record.to_bytes())?;
        self.log.flush()?;
        Ok(())
    }

    /// Row for an auto id, or [`TOMBSTONE`] if out of range or deleted.
    pub fn row_for_auto(&self, auto_id: u64) -> i64 {
        self.auto_row
            .get(auto_id as usize)
            .copied()
            .unwrap_or(TOMBSTONE)
    }

    /// Row for a user id's live auto id, or [`TOMBSTONE`] if absent.
    pub fn row_for_user(&self, user_id: u64) -> i64 {
        match self.user_auto.get(&user_id) {
            Some(&auto_id) => self.row_for_auto(auto_id),
            None => TOMBSTONE,
        }
    }

    /// Check if a user id is currently mapped
    pub fn contains_user(&self, user_id: u64) -> bool {
        self.user_auto.contains_key(&user_id)
    }

    /// Number of live user-id mappings
    pub fn len(&self) -> usize {
        self.user_auto.len()
    }

    /// Check if no user ids are mapped
    pub fn is_empty(&self) -> bool {
        self.user_auto.is_empty()
    }

    /// The auto id the next successful insert will be assigned
    pub fn next_auto_id(&self) -> u64 {
        self.next_auto_id
    }

    /// Highest row referenced by any live entry, or `None` if there are none.
    ///
    /// Matrix rows past this are uncommitted; see
    /// [`MatrixSlab::clamp_count`](crate::slab::MatrixSlab::clamp_count).
    pub fn max_live_row(&self) -> Option<i64> {
        self.auto_row.iter().copied().filter(|&row| row >= 0).max()
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
