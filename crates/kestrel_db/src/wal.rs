//! Write-ahead log for the embedded key-value engine.
//!
//! One record is appended per committed write batch, so replay reinstalls
//! whole transactions or nothing. Record framing:
//!
//! ```text
//!   [len: u32 LE][crc32: u32 LE][bincode payload]
//! ```
//!
//! behind a segment header of magic bytes and a format version. A torn or
//! checksum-failing tail record ends replay (the writer died mid-append);
//! anything before it is intact.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use kestrel_common::config::SyncMode;
use kestrel_common::error::EngineError;

/// Log format version for compatibility checks.
pub const WAL_FORMAT_VERSION: u32 = 1;

/// Magic bytes written at the start of the log for validation.
pub const WAL_MAGIC: &[u8; 4] = b"KSTL";

/// Size of the log header: magic (4) + format version (4).
pub const WAL_HEADER_SIZE: usize = 8;

/// A single log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    /// A committed write batch, applied atomically on replay.
    Commit { ops: Vec<WalOp> },
}

/// One operation inside a committed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Append-only log writer.
pub struct WalWriter {
    writer: BufWriter<File>,
    sync_mode: SyncMode,
}

impl WalWriter {
    /// Open the log for appending, writing the header if the file is new.
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self, EngineError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata().map(|m| m.len()).unwrap_or(0) == 0;

        let mut writer = BufWriter::new(file);
        if is_new {
            writer.write_all(WAL_MAGIC)?;
            writer.write_all(&WAL_FORMAT_VERSION.to_le_bytes())?;
            writer.flush()?;
        }

        Ok(Self { writer, sync_mode })
    }

    /// Append a record and make it durable according to the sync mode.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), EngineError> {
        let data = bincode::serialize(record)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let checksum = crc32fast::hash(&data);
        let len = data.len() as u32;

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&checksum.to_le_bytes())?;
        self.writer.write_all(&data)?;
        self.writer.flush()?;
        match self.sync_mode {
            SyncMode::None => {}
            SyncMode::FDataSync => self.writer.get_ref().sync_data()?,
        }
        Ok(())
    }
}

/// Replay all intact records, invoking `apply` for each in append order.
///
/// Returns the byte length of the valid log prefix, so the caller can
/// truncate a torn tail before appending again. Fails with
/// `EngineError::Corruption` when the header is missing or does not match
/// the expected magic/version. A damaged tail record stops replay with a
/// warning instead: the writer was cut off mid-append and everything before
/// the tear is valid.
pub fn replay(path: &Path, mut apply: impl FnMut(WalRecord)) -> Result<u64, EngineError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; WAL_HEADER_SIZE];
    file.read_exact(&mut header)
        .map_err(|_| EngineError::Corruption("log too short for header".into()))?;
    if &header[0..4] != WAL_MAGIC {
        return Err(EngineError::Corruption("bad log magic".into()));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != WAL_FORMAT_VERSION {
        return Err(EngineError::Corruption(format!(
            "unsupported log format version {version}, expected {WAL_FORMAT_VERSION}"
        )));
    }

    let mut valid_len = WAL_HEADER_SIZE as u64;
    loop {
        let mut frame = [0u8; 8];
        match file.read_exact(&mut frame) {
            Ok(()) => {}
            Err(_) => break, // clean end or torn frame header
        }
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let checksum = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let mut data = vec![0u8; len];
        if file.read_exact(&mut data).is_err() {
            tracing::warn!("log truncated at position {}, stopping replay", valid_len);
            break;
        }
        if crc32fast::hash(&data) != checksum {
            tracing::warn!(
                "log checksum mismatch at position {}, stopping replay",
                valid_len
            );
            break;
        }
        match bincode::deserialize::<WalRecord>(&data) {
            Ok(record) => apply(record),
            Err(e) => {
                tracing::warn!(
                    "log deserialization error at position {}: {}",
                    valid_len,
                    e
                );
                break;
            }
        }
        valid_len += 8 + len as u64;
    }

    Ok(valid_len)
}
