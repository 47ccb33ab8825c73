// Packet capture logs
// Each record is a u32 little-endian length followed by a bincode
// PacketEntry. Logs may be gzip-compressed after the session ends.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketEntry {
    pub timestamp: i64,
    pub direction: PacketDirection,
    /// Packet id varint followed by the body.
    pub data: Vec<u8>,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketDirection {
    Clientbound,
    Serverbound,
}

impl PacketDirection {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "c" | "client" | "clientbound" | "toclient" => Some(PacketDirection::Clientbound),
            "s" | "server" | "serverbound" | "toserver" => Some(PacketDirection::Serverbound),
            _ => None,
        }
    }

    /// Key of this direction's section in a protodef document.
    pub fn section_key(self) -> &'static str {
        match self {
            PacketDirection::Clientbound => "toClient",
            PacketDirection::Serverbound => "toServer",
        }
    }
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Clientbound => write!(f, "S->C"),
            PacketDirection::Serverbound => write!(f, "C->S"),
        }
    }
}

/// Appends framed entries to `<log_dir>/<session>.bin`.
///
/// Opening an existing session continues it, so the same log can be fed
/// by several runs and read back with [`SessionLog::load`].
pub struct PacketLogger {
    session: String,
    log_path: PathBuf,
    writer: Option<BufWriter<File>>,
    protocol_version: Option<String>,
}

impl PacketLogger {
    pub fn open(
        log_dir: impl AsRef<Path>,
        session: &str,
        protocol_version: Option<String>,
    ) -> Result<Self> {
        if session.is_empty() || session.contains(|c: char| c == '/' || c == '\\') {
            return Err(anyhow!("Invalid session name '{}'", session));
        }
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let log_path = log_dir.join(format!("{}.bin", session));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open packet log {}", log_path.display()))?;
        debug!(path = %log_path.display(), "opened packet log");

        Ok(Self {
            session: session.to_string(),
            log_path,
            writer: Some(BufWriter::new(file)),
            protocol_version,
        })
    }

    /// Opens a log under a fresh random session name.
    pub fn new_session(log_dir: impl AsRef<Path>, protocol_version: Option<String>) -> Result<Self> {
        Self::open(log_dir, &Uuid::new_v4().to_string(), protocol_version)
    }

    /// Logs one packet (id varint plus body) stamped with the current time.
    pub fn log_packet(&mut self, direction: PacketDirection, data: Vec<u8>) -> Result<()> {
        let entry = PacketEntry {
            timestamp: Utc::now().timestamp_millis(),
            direction,
            data,
            protocol_version: self.protocol_version.clone(),
        };
        self.append(&entry)
    }

    pub fn append(&mut self, entry: &PacketEntry) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer
            .write_all(&encode_entry(entry)?)
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write packet log {}", self.log_path.display()))
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl Drop for PacketLogger {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "failed to flush packet log");
            }
        }
    }
}

/// Frames one entry as stored in a log: u32 LE length, then bincode.
pub fn encode_entry(entry: &PacketEntry) -> Result<Vec<u8>> {
    let serialized = bincode::serialize(entry).context("Failed to serialize packet entry")?;
    let len = u32::try_from(serialized.len()).context("Packet entry too large for a log record")?;
    let mut framed = Vec::with_capacity(4 + serialized.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&serialized);
    Ok(framed)
}

/// All entries of one capture log.
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub path: PathBuf,
    pub entries: Vec<PacketEntry>,
}

impl SessionLog {
    /// Reads a `.bin` or `.bin.gz` log. A record cut off at the end of the
    /// file (a session that did not shut down cleanly) ends the log.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_log_bytes(path)?;
        let entries = parse_entries(&raw)
            .with_context(|| format!("Failed to parse packet log {}", path.display()))?;
        debug!(path = %path.display(), entries = entries.len(), "loaded packet log");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_log_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if path.extension().and_then(|s| s.to_str()) != Some("gz") {
        let mut data = Vec::new();
        let mut file = file;
        file.read_to_end(&mut data)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(data);
    }

    let mut decoder = GzDecoder::new(file);
    let mut buffer = Vec::new();
    if let Err(e) = decoder.read_to_end(&mut buffer) {
        if buffer.is_empty() {
            return Err(anyhow!("Could not decompress any data from {}: {}", path.display(), e));
        }
        warn!(error = %e, bytes = buffer.len(), "decompression stopped early, using partial data");
    }
    Ok(buffer)
}

fn parse_entries(raw: &[u8]) -> Result<Vec<PacketEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < raw.len() {
        let Some(len_bytes) = raw.get(offset..offset + 4) else {
            warn!(offset, "truncated record length at end of log");
            break;
        };
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
        offset += 4;
        let Some(record) = raw.get(offset..offset + len) else {
            warn!(offset, len, "truncated record at end of log");
            break;
        };
        let entry: PacketEntry = bincode::deserialize(record)
            .with_context(|| format!("Bad record at offset {}", offset - 4))?;
        entries.push(entry);
        offset += len;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mc-protodef-log-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_log_and_load() {
        let dir = temp_dir();
        let path = {
            let mut logger = PacketLogger::open(&dir, "session-a", Some("1.20.1".into())).unwrap();
            logger.log_packet(PacketDirection::Clientbound, vec![0x00, 0x2A]).unwrap();
            logger.log_packet(PacketDirection::Serverbound, vec![0x05, 0x01]).unwrap();
            assert_eq!(logger.session(), "session-a");
            logger.log_path().to_path_buf()
        };
        assert_eq!(path, dir.join("session-a.bin"));

        let log = SessionLog::load(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries[0].direction, PacketDirection::Clientbound);
        assert_eq!(log.entries[1].data, vec![0x05, 0x01]);
        assert_eq!(log.entries[0].protocol_version.as_deref(), Some("1.20.1"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reopened_session_appends() {
        let dir = temp_dir();
        for byte in [1u8, 2] {
            let mut logger = PacketLogger::open(&dir, "shared", None).unwrap();
            logger.log_packet(PacketDirection::Clientbound, vec![0x00, byte]).unwrap();
        }
        let log = SessionLog::load(&dir.join("shared.bin")).unwrap();
        let bodies: Vec<u8> = log.entries.iter().map(|e| e.data[1]).collect();
        assert_eq!(bodies, vec![1, 2]);

        let fresh = PacketLogger::new_session(&dir, None).unwrap();
        assert!(Uuid::parse_str(fresh.session()).is_ok());
        assert!(PacketLogger::open(&dir, "../escape", None).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_gzip_log() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let entry = PacketEntry {
            timestamp: 1,
            direction: PacketDirection::Serverbound,
            data: vec![1, 2, 3],
            protocol_version: None,
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&encode_entry(&entry).unwrap()).unwrap();
        let path = dir.join("session.bin.gz");
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let log = SessionLog::load(&path).unwrap();
        assert_eq!(log.entries, vec![entry]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let entry = PacketEntry {
            timestamp: 7,
            direction: PacketDirection::Clientbound,
            data: vec![9],
            protocol_version: Some("1.20.1".into()),
        };
        let mut raw = encode_entry(&entry).unwrap();
        raw.extend_from_slice(&[50, 0, 0, 0, 1, 2]);
        let entries = parse_entries(&raw).unwrap();
        assert_eq!(entries, vec![entry]);
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!(PacketDirection::from_str("c"), Some(PacketDirection::Clientbound));
        assert_eq!(PacketDirection::from_str("Serverbound"), Some(PacketDirection::Serverbound));
        assert_eq!(PacketDirection::from_str("up"), None);
        assert_eq!(PacketDirection::Clientbound.section_key(), "toClient");
    }
}
