//! Segmented, offset-addressed commit log.
//!
//! A [`Log`] is an ordered list of [`Segment`]s. Each segment pairs a
//! [`Store`] holding length-prefixed records with an [`Index`] mapping
//! relative offsets to store positions. Only the last segment takes writes;
//! it is replaced by a fresh one as soon as an append fills it up.

mod config;
mod index;
mod reader;
mod record;
mod segment;
mod store;

pub use config::{Config, SegmentConfig, DEFAULT_MAX_INDEX_BYTES, DEFAULT_MAX_STORE_BYTES};
pub use index::{Index, ENTRY_WIDTH, LAST_ENTRY, OFFSET_WIDTH, POSITION_WIDTH};
pub use reader::LogReader;
pub use record::Record;
pub use segment::{parse_segment_file_name, segment_file_path, Segment, SegmentFile};
pub use store::{Store, LEN_WIDTH};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::common::{Error, Result};

pub struct Log {
    dir: PathBuf,
    config: Config,
    segments: RwLock<Vec<Segment>>,
    // Carries the next offset to be assigned; tailing readers wait on it.
    appended: watch::Sender<u64>,
}

impl Log {
    pub fn new(dir: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let dir = dir.into();
        let config = config.normalized()?;
        let segments = setup(&dir, &config)?;
        let next_offset = segments.last().map_or(0, Segment::next_offset);
        let (appended, _) = watch::channel(next_offset);

        info!(dir = %dir.display(), segments = segments.len(), next_offset, "log opened");
        Ok(Log {
            dir,
            config,
            segments: RwLock::new(segments),
            appended,
        })
    }

    /// Appends `record` to the active segment and returns its offset.
    pub fn append(&self, mut record: Record) -> Result<u64> {
        let mut segments = self.segments.write();

        let appended = active(&mut segments)?.append(&mut record);
        let offset = match appended {
            Err(Error::CapacityExceeded) => {
                // A segment reopened under smaller limits can be full
                // before any append made it so.
                let full = active(&mut segments)?;
                if full.is_empty() {
                    return Err(Error::CapacityExceeded);
                }
                let base_offset = full.next_offset();
                self.rotate(&mut segments, base_offset)?;
                active(&mut segments)?.append(&mut record)?
            }
            result => result?,
        };

        if active(&mut segments)?.is_maxed() {
            self.rotate(&mut segments, offset + 1)?;
        }
        drop(segments);

        self.appended.send_replace(offset + 1);
        Ok(offset)
    }

    /// Reads the record at `offset`.
    pub fn read(&self, offset: u64) -> Result<Record> {
        let segments = self.segments.read();
        segments
            .iter()
            .find(|segment| segment.contains(offset))
            .ok_or(Error::OffsetOutOfRange(offset))?
            .read(offset)
    }

    pub fn lowest_offset(&self) -> u64 {
        self.segments
            .read()
            .first()
            .map_or(self.config.segment.initial_offset, Segment::base_offset)
    }

    pub fn highest_offset(&self) -> u64 {
        let next_offset = self.segments.read().last().map_or(0, Segment::next_offset);
        next_offset.saturating_sub(1)
    }

    /// Removes every segment whose highest offset is at or below `lowest`.
    pub fn truncate(&self, lowest: u64) -> Result<()> {
        let mut segments = self.segments.write();
        let next_offset = segments.last().map_or(0, Segment::next_offset);

        let mut kept = Vec::with_capacity(segments.len());
        let mut drained = std::mem::take(&mut *segments).into_iter();
        while let Some(segment) = drained.next() {
            match segment.highest_offset() {
                Some(highest) if highest <= lowest => {
                    let base_offset = segment.base_offset();
                    if let Err(err) = segment.remove() {
                        kept.extend(drained);
                        *segments = kept;
                        return Err(err);
                    }
                    debug!(base_offset, highest, lowest, "segment truncated");
                }
                _ => kept.push(segment),
            }
        }

        if kept.is_empty() {
            kept.push(Segment::new(&self.dir, next_offset, &self.config)?);
        }
        *segments = kept;
        Ok(())
    }

    /// Returns a reader over the raw store bytes of every segment, in order.
    pub fn reader(&self) -> LogReader {
        let segments = self.segments.read();
        LogReader::new(segments.iter().map(Segment::store).collect())
    }

    /// Watches the next offset to be assigned. Changes on every append.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }

    pub fn close(&self) -> Result<()> {
        let mut segments = self.segments.write();
        close_all(&mut segments)
    }

    /// Closes the log and deletes its directory.
    pub fn remove(&self) -> Result<()> {
        let mut segments = self.segments.write();
        self.remove_locked(&mut segments)
    }

    /// Deletes everything and starts over with one empty segment.
    pub fn reset(&self) -> Result<()> {
        let mut segments = self.segments.write();
        self.remove_locked(&mut segments)?;
        *segments = setup(&self.dir, &self.config)?;

        let next_offset = segments.last().map_or(0, Segment::next_offset);
        drop(segments);
        self.appended.send_replace(next_offset);
        info!(dir = %self.dir.display(), "log reset");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn remove_locked(&self, segments: &mut Vec<Segment>) -> Result<()> {
        close_all(segments)?;
        segments.clear();
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    fn rotate(&self, segments: &mut Vec<Segment>, base_offset: u64) -> Result<()> {
        let segment = Segment::new(&self.dir, base_offset, &self.config)?;
        segments.push(segment);
        info!(base_offset, "rotated to new active segment");
        Ok(())
    }
}

/// Opens one segment per base offset found in `dir`, or a single empty one
/// at the initial offset when there is nothing to recover.
fn setup(dir: &Path, config: &Config) -> Result<Vec<Segment>> {
    fs::create_dir_all(dir)?;

    let mut base_offsets = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name
            .to_str()
            .ok_or_else(|| Error::MalformedFileName(name.to_string_lossy().into_owned()))?;
        let (base_offset, _) = parse_segment_file_name(name)?;
        base_offsets.insert(base_offset);
    }

    let mut segments = base_offsets
        .into_iter()
        .map(|base_offset| Segment::new(dir, base_offset, config))
        .collect::<Result<Vec<_>>>()?;

    if segments.is_empty() {
        segments.push(Segment::new(dir, config.segment.initial_offset, config)?);
    }
    Ok(segments)
}

fn active(segments: &mut [Segment]) -> Result<&mut Segment> {
    segments.last_mut().ok_or(Error::NoActiveSegment)
}

fn close_all(segments: &mut [Segment]) -> Result<()> {
    for segment in segments.iter_mut() {
        segment.close()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use tempfile::TempDir;

    fn new_log(dir: &Path, max_store_bytes: u64, max_index_bytes: u64) -> Log {
        Log::new(
            dir,
            Config::with_segment(SegmentConfig {
                max_store_bytes,
                max_index_bytes,
                initial_offset: 0,
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_append_read() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 32, 0);

        for i in 0..10u64 {
            let offset = log.append(Record::new(format!("record {}", i))).unwrap();
            assert_eq!(offset, i);
        }
        for i in 0..10u64 {
            let record = log.read(i).unwrap();
            assert_eq!(record.value, format!("record {}", i).into_bytes());
            assert_eq!(record.offset, i);
        }
        assert!(log.segments.read().len() > 1);
    }

    #[test]
    fn test_out_of_range() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 0, 0);

        assert!(matches!(log.read(0), Err(Error::OffsetOutOfRange(0))));
        log.append(Record::new("hello world")).unwrap();
        let err = log.read(1).unwrap_err();
        assert!(err.is_offset_out_of_range());
    }

    #[test]
    fn test_init_existing() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 32, 0);
        for _ in 0..3 {
            log.append(Record::new("hello world")).unwrap();
        }
        log.close().unwrap();
        assert_eq!(log.lowest_offset(), 0);
        assert_eq!(log.highest_offset(), 2);
        drop(log);

        let log = new_log(dir.path(), 32, 0);
        assert_eq!(log.lowest_offset(), 0);
        assert_eq!(log.highest_offset(), 2);
        assert_eq!(log.read(2).unwrap().value, b"hello world".to_vec());
        assert_eq!(log.append(Record::new("again")).unwrap(), 3);
    }

    #[test]
    fn test_rotation_after_maxed_append() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 1024, ENTRY_WIDTH * 3);

        for i in 0..3 {
            assert_eq!(log.append(Record::new("hello world")).unwrap(), i);
        }
        {
            let segments = log.segments.read();
            assert_eq!(segments.len(), 2);
            assert_eq!(segments[1].base_offset(), 3);
            assert!(segments[1].is_empty());
        }
        assert_eq!(log.append(Record::new("hello world")).unwrap(), 3);
    }

    #[test]
    fn test_full_segment_after_reopen_rotates() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 1024, 1024);
        log.append(Record::new("a")).unwrap();
        log.append(Record::new("b")).unwrap();
        drop(log);

        // Reopened with a limit the existing segment already exceeds.
        let log = new_log(dir.path(), 1024, ENTRY_WIDTH);
        assert_eq!(log.append(Record::new("c")).unwrap(), 2);
        assert_eq!(log.read(2).unwrap().value, b"c".to_vec());
        assert_eq!(log.read(0).unwrap().value, b"a".to_vec());
    }

    #[test]
    fn test_initial_offset() {
        let dir = TempDir::new().unwrap();
        let log = Log::new(
            dir.path(),
            Config::with_segment(SegmentConfig {
                initial_offset: 16,
                ..Default::default()
            }),
        )
        .unwrap();

        assert_eq!(log.lowest_offset(), 16);
        assert_eq!(log.append(Record::new("hello world")).unwrap(), 16);
        assert_eq!(log.highest_offset(), 16);
        assert!(segment_file_path(dir.path(), 16, SegmentFile::Store).exists());
    }

    #[test]
    fn test_reader() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 32, 0);
        let values: Vec<String> = (0..5).map(|i| format!("value {}", i)).collect();
        for value in &values {
            log.append(Record::new(value.as_str())).unwrap();
        }

        let mut bytes = Vec::new();
        log.reader().read_to_end(&mut bytes).unwrap();

        // Re-frame the stream and re-derive offsets from frame order.
        let mut rest = bytes.as_slice();
        let mut offset = 0u64;
        while !rest.is_empty() {
            let mut len = [0u8; LEN_WIDTH as usize];
            len.copy_from_slice(&rest[..LEN_WIDTH as usize]);
            let len = u64::from_be_bytes(len) as usize;
            let frame = &rest[LEN_WIDTH as usize..LEN_WIDTH as usize + len];

            let record = Record::decode(frame).unwrap();
            assert_eq!(record.offset, offset);
            assert_eq!(record.value, values[offset as usize].as_bytes());

            rest = &rest[LEN_WIDTH as usize + len..];
            offset += 1;
        }
        assert_eq!(offset, 5);
    }

    #[test]
    fn test_truncate() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 32, 0);
        for _ in 0..3 {
            log.append(Record::new("hello world")).unwrap();
        }

        log.truncate(1).unwrap();
        assert!(matches!(log.read(0), Err(Error::OffsetOutOfRange(0))));
        assert!(matches!(log.read(1), Err(Error::OffsetOutOfRange(1))));
        assert_eq!(log.read(2).unwrap().offset, 2);
        assert_eq!(log.lowest_offset(), 2);
        assert!(!segment_file_path(dir.path(), 0, SegmentFile::Store).exists());
        assert!(!segment_file_path(dir.path(), 0, SegmentFile::Index).exists());
    }

    #[test]
    fn test_truncate_everything_keeps_an_active_segment() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 1024, 1024);
        for _ in 0..3 {
            log.append(Record::new("hello world")).unwrap();
        }

        log.truncate(10).unwrap();
        assert!(matches!(log.read(2), Err(Error::OffsetOutOfRange(2))));
        assert_eq!(log.lowest_offset(), 3);
        assert_eq!(log.append(Record::new("next")).unwrap(), 3);
    }

    #[test]
    fn test_reset() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 32, 0);
        for _ in 0..3 {
            log.append(Record::new("hello world")).unwrap();
        }

        let mut appended = log.subscribe();
        log.reset().unwrap();
        assert!(appended.has_changed().unwrap());
        assert_eq!(*appended.borrow_and_update(), 0);

        assert!(dir.path().exists());
        assert_eq!(log.segments.read().len(), 1);
        assert!(matches!(log.read(0), Err(Error::OffsetOutOfRange(0))));
        assert_eq!(log.append(Record::new("fresh")).unwrap(), 0);
    }

    #[test]
    fn test_malformed_file_name_fails_setup() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("not-a-segment.txt"), b"junk").unwrap();

        let result = Log::new(dir.path(), Config::default());
        assert!(matches!(result, Err(Error::MalformedFileName(_))));
    }

    #[test]
    fn test_subscribe_sees_appends() {
        let dir = TempDir::new().unwrap();
        let log = new_log(dir.path(), 0, 0);
        let mut appended = log.subscribe();
        assert!(!appended.has_changed().unwrap());

        log.append(Record::new("hello world")).unwrap();
        assert!(appended.has_changed().unwrap());
        assert_eq!(*appended.borrow_and_update(), 1);
    }
}
