use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// File under the log. A plain `File` outside of tests.
trait LogFile: Write + Send {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

fn open_append(path: &Path) -> io::Result<(Box<dyn LogFile>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((Box::new(file), len))
}

/// Append-only Write-Ahead Log for the session grid.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - Truncated last entry (crash) is safely discarded via length-prefix + CRC check.
/// - A failed append is cut back off the file, so replay never sees a write
///   the caller was told had failed.
pub struct Wal {
    file: Box<dyn LogFile>,
    path: PathBuf,
    /// Bytes covered by committed records.
    len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (file, len) = open_append(path)?;
        Ok(Self::with_file(path, file, len))
    }

    fn with_file(path: &Path, file: Box<dyn LogFile>, len: u64) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            len,
            poisoned: false,
            appends_since_compact: 0,
        }
    }

    /// Replay then open for appending. A torn or corrupt tail is cut off so
    /// new records follow the last valid one. Replayed records count towards
    /// the next compaction.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid) = match File::open(path) {
            Ok(file) => read_events(BufReader::new(file), path)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Vec::new(), 0),
            Err(e) => return Err(e),
        };
        let mut wal = Self::open(path)?;
        if wal.len > valid {
            tracing::warn!(
                "wal {}: dropping {} trailing bytes after {} records",
                path.display(),
                wal.len - valid,
                events.len()
            );
            wal.file.truncate(valid)?;
            wal.file.sync()?;
            wal.len = valid;
        }
        wal.appends_since_compact = events.len() as u64;
        Ok((wal, events))
    }

    /// Append one event and fsync before returning.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(format!(
                "wal {}: refusing to append after a failed rollback",
                self.path.display()
            )));
        }
        let mut record = Vec::new();
        encode_event(&mut record, event)?;
        if let Err(e) = self.write_record(&record) {
            self.rollback();
            return Err(e);
        }
        self.len += record.len() as u64;
        self.appends_since_compact += 1;
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.file.write_all(record)?;
        self.file.sync()
    }

    /// Cut the file back to the last committed record. The next successful
    /// append's fsync makes the new length durable.
    fn rollback(&mut self) {
        if let Err(e) = self.file.truncate(self.len) {
            tracing::error!(
                "wal {}: cannot truncate back to {} bytes: {e}",
                self.path.display(),
                self.len
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    /// Needs no access to the open log.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let (file, len) = open_append(&self.path)?;
        self.file = file;
        self.len = len;
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replace the WAL with a minimal set of events that recreates the current state.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let (events, _) = read_events(BufReader::new(file), path)?;
        Ok(events)
    }
}

/// Decode records until the first torn or corrupt one.
/// Returns the events and the byte length they cover.
fn read_events(mut reader: impl Read, path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let mut events = Vec::new();
    let mut valid = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_WAL_RECORD_BYTES {
            tracing::warn!("wal {}: record of {len} bytes, stopping replay", path.display());
            break;
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            tracing::warn!("wal {}: crc mismatch after {} records", path.display(), events.len());
            break;
        }

        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break, // corrupt payload
        }
        valid += 8 + len as u64;
    }

    Ok((events, valid))
}
