//! Durable cache backed by a single append-only log file.
//!
//! # File layout
//!
//! All integers are little-endian.
//!
//! ```text
//! Header:
//!   4 bytes        magic        'C' 'G' 'C' 0x01
//!   u32            header_len   length of the flags section (currently 1)
//!   u8             flags        bit 0 = compress, bit 1 = timestamp
//!
//! Record, repeated until end of file:
//!   [u64           timestamp]   milliseconds since the epoch, only if flags.timestamp
//!   u32            key_len
//!   [u8; key_len]  key          codec-encoded, optionally compressed
//!   u32            val_len
//!   [u8; val_len]  value        codec-encoded, optionally compressed; empty = tombstone
//! ```
//!
//! Records are never rewritten. An overwrite or delete appends a new record and the
//! in-memory index is pointed at it, so the last record for a key wins. The index is
//! rebuilt from the log on open; the file is the source of truth. Stale records are not
//! reclaimed, so the file grows with every write.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::hash::Hash;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::binary::{ReadBinaryExt, WriteBinaryExt};
use crate::clock::{Clock, SystemClock};
use crate::codec::{BincodeCodec, JsonCodec, RecordCodec};
use crate::compression::CompressionAlgorithm;
use crate::config::FileCacheConfig;
use crate::error::{Error, Result};
use crate::store::{Cache, KeyIterator};

pub const MAGIC: [u8; 4] = [b'C', b'G', b'C', 0x01];

/// Length of the flags section written into new files
pub const FLAGS_LEN: u32 = 1;

/// Key and value lengths must fit in 31 bits; the top bit of the length field is reserved.
pub const MAX_FIELD_LEN: u32 = 0x7FFF_FFFF;

const FLAG_COMPRESS: u8 = 0x1;
const FLAG_TIMESTAMP: u8 = 0x2;

// magic + header_len
const HEADER_PREFIX_LEN: u64 = 8;

/// Format flags stored in the file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFlags {
    pub compress: bool,
    pub timestamp: bool,
}

impl LogFlags {
    pub fn to_byte(self) -> u8 {
        let mut flags = 0;
        if self.compress {
            flags |= FLAG_COMPRESS;
        }
        if self.timestamp {
            flags |= FLAG_TIMESTAMP;
        }
        flags
    }

    pub fn from_byte(flags: u8) -> Self {
        Self {
            compress: flags & FLAG_COMPRESS != 0,
            timestamp: flags & FLAG_TIMESTAMP != 0,
        }
    }
}

/// What the index rebuild found while replaying the log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Complete records read
    pub records_scanned: usize,
    /// Keys with a live value after replay
    pub live_keys: usize,
    /// Keys whose last record is a tombstone
    pub tombstones: usize,
    /// Records skipped because they were older than the max age
    pub expired: usize,
    /// Bytes of a partial trailing record cut off the end of the file
    pub bytes_truncated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexEntry {
    Live {
        /// Start of the record, before the timestamp
        offset: u64,
        written_at: Option<u64>,
    },
    Tombstone,
}

struct ScannedRecord<Key> {
    key: Key,
    written_at: Option<u64>,
    tombstone: bool,
    end: u64,
}

enum ValueRead {
    Expired,
    Value(Vec<u8>),
}

/// Durable cache that appends every write to a log file and keeps a key → offset index
/// in memory.
///
/// Every call blocks on file I/O. There is no internal locking; share an instance across
/// threads behind a mutex.
pub struct FileBackedCache<Key, Value, Serde = BincodeCodec>
where
    Key: Clone + Eq + Hash + Serialize + DeserializeOwned,
    Value: Serialize + DeserializeOwned,
    Serde: RecordCodec,
{
    path: PathBuf,
    file: File,
    flags: LogFlags,
    max_age_millis: Option<u64>,
    sync_on_write: bool,
    clock: Box<dyn Clock>,
    index: HashMap<Key, IndexEntry>,
    // append position, always the end of the last complete record
    end: u64,
    stats: RebuildStats,
    phantom_serde: PhantomData<Serde>,
    phantom_value: PhantomData<Value>,
}

impl<Key, Value, Serde> FileBackedCache<Key, Value, Serde>
where
    Key: Clone + Eq + Hash + Serialize + DeserializeOwned,
    Value: Serialize + DeserializeOwned,
    Serde: RecordCodec,
{
    pub fn open(path: impl AsRef<Path>, config: FileCacheConfig) -> Result<Self> {
        Self::open_with_clock(path, config, Box::new(SystemClock))
    }

    /// Opens `path`, creating it with a header built from `config` if it does not exist or
    /// is empty. An existing file keeps the compress/timestamp flags from its header.
    pub fn open_with_clock(
        path: impl AsRef<Path>,
        config: FileCacheConfig,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let mut cache = Self {
            path,
            file,
            flags: LogFlags {
                compress: config.compress,
                timestamp: config.timestamp,
            },
            max_age_millis: config
                .max_age()
                .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
            sync_on_write: config.sync_on_write,
            clock,
            index: HashMap::new(),
            end: 0,
            stats: RebuildStats::default(),
            phantom_serde: Default::default(),
            phantom_value: Default::default(),
        };

        if file_len == 0 {
            cache.write_header()?;
            debug!(path = %cache.path.display(), flags = ?cache.flags, "created cache log");
        } else {
            let data_start = cache.read_header()?;
            if cache.flags.compress != config.compress || cache.flags.timestamp != config.timestamp
            {
                debug!(
                    path = %cache.path.display(),
                    stored = ?cache.flags,
                    "existing cache log keeps the flags from its header"
                );
            }
            cache.rebuild_index(data_start, file_len)?;
        }

        if cache.max_age_millis.is_some() && !cache.flags.timestamp {
            warn!(
                path = %cache.path.display(),
                "max age is set but the log has no timestamps; entries will not expire"
            );
        }

        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.flags.compress
    }

    pub fn is_timestamped(&self) -> bool {
        self.flags.timestamp
    }

    pub fn flags(&self) -> LogFlags {
        self.flags
    }

    /// Statistics from replaying the log when this instance was opened
    pub fn rebuild_stats(&self) -> &RebuildStats {
        &self.stats
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.index
            .values()
            .filter(|entry| self.is_live(entry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the log in bytes.
    pub fn file_len(&self) -> u64 {
        self.end
    }

    /// Flushes the log to disk and releases the file handle.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        debug!(path = %self.path.display(), bytes = self.end, "closed cache log");
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let mut header = Vec::with_capacity(HEADER_PREFIX_LEN as usize + FLAGS_LEN as usize);
        header.write_raw_bytes(&MAGIC)?;
        header.write_u32_le(FLAGS_LEN)?;
        header.write_byte(self.flags.to_byte())?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.sync_data()?;
        self.end = header.len() as u64;
        Ok(())
    }

    /// Validates the header and loads the stored flags. Returns the offset of the first
    /// record.
    fn read_header(&mut self) -> Result<u64> {
        let mut reader = BufReader::new(&self.file);
        reader.seek(SeekFrom::Start(0))?;

        // A file shorter than the magic is still reported as a bad magic.
        let mut magic = Vec::with_capacity(MAGIC.len());
        (&mut reader)
            .take(MAGIC.len() as u64)
            .read_to_end(&mut magic)?;
        if magic != MAGIC {
            let mut found = [0u8; 4];
            found[..magic.len()].copy_from_slice(&magic);
            return Err(Error::InvalidMagic { found });
        }

        let header_len = reader
            .read_u32_le()
            .map_err(|e| short_header(e, MAGIC.len() as u64))?;
        // Anything past the first flags byte is reserved and skipped.
        self.flags = if header_len == 0 {
            LogFlags::default()
        } else {
            LogFlags::from_byte(
                reader
                    .read_byte()
                    .map_err(|e| short_header(e, HEADER_PREFIX_LEN))?,
            )
        };

        Ok(HEADER_PREFIX_LEN + u64::from(header_len))
    }

    /// Replays every record after the header. The last record for a key wins; expired
    /// records drop their key from the index entirely. A partial record at the end of the
    /// file is cut off.
    fn rebuild_index(&mut self, data_start: u64, file_len: u64) -> Result<()> {
        let now = self.clock.now_millis();
        let mut index = HashMap::new();
        let mut stats = RebuildStats::default();

        let valid_end = {
            let mut reader = BufReader::new(&self.file);
            reader.seek(SeekFrom::Start(data_start))?;

            let mut offset = data_start;
            while offset < file_len {
                let Some(record) = self.scan_record(&mut reader, offset, file_len)? else {
                    break;
                };
                stats.records_scanned += 1;

                if expired(record.written_at, now, self.max_age_millis) {
                    stats.expired += 1;
                    index.remove(&record.key);
                } else if record.tombstone {
                    index.insert(record.key, IndexEntry::Tombstone);
                } else {
                    index.insert(
                        record.key,
                        IndexEntry::Live {
                            offset,
                            written_at: record.written_at,
                        },
                    );
                }
                offset = record.end;
            }
            offset.min(file_len)
        };

        if valid_end < file_len {
            stats.bytes_truncated = file_len - valid_end;
            warn!(
                path = %self.path.display(),
                offset = valid_end,
                bytes = stats.bytes_truncated,
                "discarding partial record at end of cache log"
            );
            self.file.set_len(valid_end)?;
        }

        stats.tombstones = index
            .values()
            .filter(|entry| matches!(entry, IndexEntry::Tombstone))
            .count();
        stats.live_keys = index.len() - stats.tombstones;

        debug!(
            path = %self.path.display(),
            records = stats.records_scanned,
            live = stats.live_keys,
            tombstones = stats.tombstones,
            expired = stats.expired,
            "rebuilt cache index"
        );

        self.index = index;
        self.end = valid_end;
        self.stats = stats;
        Ok(())
    }

    /// Reads one record starting at `offset`, leaving the reader at the next record.
    /// Returns `None` if the file ends part way through the record.
    fn scan_record(
        &self,
        reader: &mut BufReader<&File>,
        offset: u64,
        file_len: u64,
    ) -> Result<Option<ScannedRecord<Key>>> {
        let fits = |pos: u64, len: u64| pos.checked_add(len).map_or(false, |end| end <= file_len);
        let mut pos = offset;

        let written_at = if self.flags.timestamp {
            if !fits(pos, 8) {
                return Ok(None);
            }
            pos += 8;
            Some(reader.read_u64_le()?)
        } else {
            None
        };

        if !fits(pos, 4) {
            return Ok(None);
        }
        let key_len = read_field_len(reader, offset, "key")?;
        pos += 4;
        if !fits(pos, u64::from(key_len)) {
            return Ok(None);
        }
        let key_bytes = reader.read_raw_bytes(key_len as usize)?;
        pos += u64::from(key_len);

        if !fits(pos, 4) {
            return Ok(None);
        }
        let val_len = read_field_len(reader, offset, "value")?;
        pos += 4;
        if !fits(pos, u64::from(val_len)) {
            return Ok(None);
        }
        reader.seek_relative(i64::from(val_len))?;
        pos += u64::from(val_len);

        let key = self.decode_field(&key_bytes)?;
        Ok(Some(ScannedRecord {
            key,
            written_at,
            tombstone: val_len == 0,
            end: pos,
        }))
    }

    /// Reads the value bytes of the record at `offset`, checking its age first.
    fn read_value_at(&self, offset: u64) -> Result<ValueRead> {
        let mut reader = BufReader::new(&self.file);
        reader.seek(SeekFrom::Start(offset))?;

        if self.flags.timestamp {
            let written_at = reader.read_u64_le()?;
            if expired(Some(written_at), self.clock.now_millis(), self.max_age_millis) {
                return Ok(ValueRead::Expired);
            }
        }

        let key_len = read_field_len(&mut reader, offset, "key")?;
        reader.seek_relative(i64::from(key_len))?;
        let val_len = read_field_len(&mut reader, offset, "value")?;
        if val_len == 0 {
            return Err(Error::CorruptRecord {
                offset,
                reason: "indexed record is a tombstone".into(),
            });
        }

        Ok(ValueRead::Value(reader.read_raw_bytes(val_len as usize)?))
    }

    fn encode_field<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let encoded = Serde::serialize(value)?;
        CompressionAlgorithm::from_flag(self.flags.compress)
            .compressor()
            .compress(&encoded)
    }

    fn decode_field<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let decompressed = CompressionAlgorithm::from_flag(self.flags.compress)
            .compressor()
            .decompress(bytes)?;
        Serde::deserialize(&decompressed)
    }

    /// Appends one complete record. The file is cut back to its previous length if the
    /// write fails, so a failed append leaves no trace. Returns the record's offset and
    /// timestamp.
    fn append(&mut self, key_bytes: &[u8], value_bytes: &[u8]) -> Result<(u64, Option<u64>)> {
        let key_len = checked_field_len("key", key_bytes.len())?;
        let val_len = checked_field_len("value", value_bytes.len())?;
        let written_at = self.flags.timestamp.then(|| self.clock.now_millis());

        let mut record = Vec::with_capacity(16 + key_bytes.len() + value_bytes.len());
        if let Some(written_at) = written_at {
            record.write_u64_le(written_at)?;
        }
        record.write_u32_le(key_len)?;
        record.write_raw_bytes(key_bytes)?;
        record.write_u32_le(val_len)?;
        record.write_raw_bytes(value_bytes)?;

        let offset = self.end;
        if let Err(e) = self.write_at_end(offset, &record) {
            if let Err(truncate_err) = self.file.set_len(offset) {
                warn!(
                    path = %self.path.display(),
                    offset,
                    error = %truncate_err,
                    "failed to roll back partial append"
                );
            }
            return Err(e.into());
        }

        self.end = offset + record.len() as u64;
        trace!(offset, bytes = record.len(), tombstone = value_bytes.is_empty(), "appended record");
        Ok((offset, written_at))
    }

    fn write_at_end(&mut self, offset: u64, record: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(record)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn append_tombstone(&mut self, key: &Key) -> Result<()> {
        let key_bytes = self.encode_field(key)?;
        self.append(&key_bytes, &[])?;
        self.index.insert(key.clone(), IndexEntry::Tombstone);
        Ok(())
    }

    fn is_live(&self, entry: &IndexEntry, now: u64) -> bool {
        match entry {
            IndexEntry::Live { written_at, .. } => !expired(*written_at, now, self.max_age_millis),
            IndexEntry::Tombstone => false,
        }
    }

    fn live_offset(&self, key: &Key) -> Option<u64> {
        match self.index.get(key) {
            Some(IndexEntry::Live { offset, .. }) => Some(*offset),
            _ => None,
        }
    }
}

impl<Key, Value, Serde> Cache<Key, Value> for FileBackedCache<Key, Value, Serde>
where
    Key: Clone + Eq + Hash + Serialize + DeserializeOwned,
    Value: Serialize + DeserializeOwned,
    Serde: RecordCodec,
{
    fn get(&mut self, key: &Key) -> Result<Option<Value>> {
        let Some(offset) = self.live_offset(key) else {
            return Ok(None);
        };

        match self.read_value_at(offset)? {
            ValueRead::Expired => {
                debug!(offset, "cache entry expired, writing tombstone");
                self.append_tombstone(key)?;
                Ok(None)
            }
            ValueRead::Value(bytes) => Ok(Some(self.decode_field(&bytes)?)),
        }
    }

    fn peek(&self, key: &Key) -> Result<Option<Value>> {
        let Some(offset) = self.live_offset(key) else {
            return Ok(None);
        };

        match self.read_value_at(offset)? {
            ValueRead::Expired => Ok(None),
            ValueRead::Value(bytes) => Ok(Some(self.decode_field(&bytes)?)),
        }
    }

    fn put(&mut self, key: &Key, value: Value) -> Result<()> {
        // Encode both sides before touching the file so a codec failure appends nothing.
        let key_bytes = self.encode_field(key)?;
        let value_bytes = self.encode_field(&value)?;
        if value_bytes.is_empty() {
            return Err(Error::EmptyValue);
        }

        let (offset, written_at) = self.append(&key_bytes, &value_bytes)?;
        self.index
            .insert(key.clone(), IndexEntry::Live { offset, written_at });
        Ok(())
    }

    fn remove(&mut self, key: &Key) -> Result<Option<Value>> {
        let value = self.get(key)?;
        if value.is_some() {
            self.append_tombstone(key)?;
        }
        Ok(value)
    }

    fn contains_key(&self, key: &Key) -> bool {
        let now = self.clock.now_millis();
        self.index
            .get(key)
            .map_or(false, |entry| self.is_live(entry, now))
    }

    /// Tombstones every live key. The old records stay in the file.
    fn clear(&mut self) -> Result<()> {
        let keys: Vec<Key> = self
            .index
            .iter()
            .filter(|(_, entry)| matches!(entry, IndexEntry::Live { .. }))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.append_tombstone(key)?;
        }
        debug!(path = %self.path.display(), cleared = keys.len(), "cleared cache log");
        Ok(())
    }

    fn keys(&self) -> KeyIterator<'_, Key> {
        let now = self.clock.now_millis();
        Box::new(
            self.index
                .iter()
                .filter(move |(_, entry)| self.is_live(entry, now))
                .map(|(key, _)| key.clone()),
        )
    }
}

fn expired(written_at: Option<u64>, now: u64, max_age_millis: Option<u64>) -> bool {
    match (written_at, max_age_millis) {
        (Some(written_at), Some(max_age)) => now.saturating_sub(written_at) > max_age,
        _ => false,
    }
}

fn short_header(err: Error, offset: u64) -> Error {
    match err {
        Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => Error::CorruptRecord {
            offset,
            reason: "file ends inside the header".to_string(),
        },
        other => other,
    }
}

fn checked_field_len(field: &'static str, len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FIELD_LEN => Ok(len),
        _ => Err(Error::OversizedField { field, len }),
    }
}

fn read_field_len(reader: &mut impl ReadBinaryExt, offset: u64, field: &str) -> Result<u32> {
    let len = reader.read_u32_le()?;
    if len > MAX_FIELD_LEN {
        return Err(Error::CorruptRecord {
            offset,
            reason: format!("{field} length {len:#x} uses the reserved top bit"),
        });
    }
    Ok(len)
}

pub type BincodeFileBackedCache<Key, Value> = FileBackedCache<Key, Value, BincodeCodec>;
pub type JsonFileBackedCache<Key, Value> = FileBackedCache<Key, Value, JsonCodec>;
