use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::config::{Config, SegmentConfig};
use super::index::Index;
use super::record::Record;
use super::store::Store;
use crate::common::{Error, Result};

pub const STORE_EXTENSION: &str = "store";
pub const INDEX_EXTENSION: &str = "index";

/// Which half of a segment a file in the log directory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFile {
    Store,
    Index,
}

/// Parses `<base offset>.store` / `<base offset>.index`.
pub fn parse_segment_file_name(name: &str) -> Result<(u64, SegmentFile)> {
    let malformed = || Error::MalformedFileName(name.to_string());

    let (stem, extension) = name.rsplit_once('.').ok_or_else(malformed)?;
    let kind = match extension {
        STORE_EXTENSION => SegmentFile::Store,
        INDEX_EXTENSION => SegmentFile::Index,
        _ => return Err(malformed()),
    };
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let base_offset = stem.parse::<u64>().map_err(|_| malformed())?;
    Ok((base_offset, kind))
}

pub fn segment_file_path(dir: &Path, base_offset: u64, kind: SegmentFile) -> PathBuf {
    let extension = match kind {
        SegmentFile::Store => STORE_EXTENSION,
        SegmentFile::Index => INDEX_EXTENSION,
    };
    dir.join(format!("{}.{}", base_offset, extension))
}

/// A store and an index covering the offsets `[base_offset, next_offset)`.
pub struct Segment {
    store: Arc<Store>,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: SegmentConfig,
}

impl Segment {
    pub fn new(dir: &Path, base_offset: u64, config: &Config) -> Result<Self> {
        let store = Store::open(
            segment_file_path(dir, base_offset, SegmentFile::Store),
            config.byte_order,
        )?;
        let index = Index::open(
            segment_file_path(dir, base_offset, SegmentFile::Index),
            config.segment.max_index_bytes,
            config.byte_order,
        )?;

        let next_offset = match index.last() {
            Ok((relative, _)) => base_offset + relative as u64 + 1,
            Err(Error::IndexEmpty) => base_offset,
            Err(err) => return Err(err),
        };
        debug!(base_offset, next_offset, "segment opened");

        Ok(Segment {
            store: Arc::new(store),
            index,
            base_offset,
            next_offset,
            config: config.segment,
        })
    }

    /// Assigns the next offset to `record` and persists it.
    ///
    /// Fails with `CapacityExceeded` before anything is written when the
    /// index is full or the store already reached its limit.
    pub fn append(&mut self, record: &mut Record) -> Result<u64> {
        if !self.index.has_room()? || self.store.size() >= self.config.max_store_bytes {
            return Err(Error::CapacityExceeded);
        }
        // Relative offsets are 32-bit on disk.
        let relative = u32::try_from(self.next_offset - self.base_offset)
            .map_err(|_| Error::CapacityExceeded)?;

        let offset = self.next_offset;
        record.offset = offset;

        let (_, position) = self.store.append(&record.encode()?)?;
        self.index.write(relative, position)?;
        self.next_offset += 1;
        Ok(offset)
    }

    pub fn read(&self, offset: u64) -> Result<Record> {
        if offset < self.base_offset {
            return Err(Error::IndexOutOfRange(offset));
        }
        let (_, position) = self.index.read((offset - self.base_offset) as i64)?;
        let bytes = self.store.read(position)?;
        Record::decode(&bytes)
    }

    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes
            || self.index.size() >= self.config.max_index_bytes
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Highest offset stored in this segment, `None` while it is empty.
    pub fn highest_offset(&self) -> Option<u64> {
        (self.next_offset > self.base_offset).then(|| self.next_offset - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.next_offset == self.base_offset
    }

    pub(crate) fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn close(&mut self) -> Result<()> {
        self.index.close()?;
        self.store.close()?;
        Ok(())
    }

    /// Closes the segment and deletes both of its files.
    pub fn remove(mut self) -> Result<()> {
        self.close()?;
        fs::remove_file(self.index.path())?;
        fs::remove_file(self.store.path())?;
        debug!(base_offset = self.base_offset, "segment removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::log::index::ENTRY_WIDTH;
    use tempfile::TempDir;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> Config {
        Config::with_segment(SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            initial_offset: 0,
        })
    }

    #[test]
    fn test_segment() {
        let dir = TempDir::new().unwrap();
        let want = Record::new("hello world!");

        let mut segment = Segment::new(dir.path(), 16, &config(1024, ENTRY_WIDTH * 3)).unwrap();
        assert_eq!(segment.base_offset(), 16);
        assert_eq!(segment.next_offset(), 16);
        assert!(!segment.is_maxed());

        for i in 0..3u64 {
            let mut record = want.clone();
            let offset = segment.append(&mut record).unwrap();
            assert_eq!(offset, 16 + i);
            assert_eq!(record.offset, offset);

            let got = segment.read(offset).unwrap();
            assert_eq!(got.value, want.value);
            assert_eq!(got.offset, offset);
        }

        let store_size = segment.store.size();
        let err = segment.append(&mut want.clone()).unwrap_err();
        assert!(err.is_capacity_exceeded());
        // Nothing of the rejected record reached the store.
        assert_eq!(segment.store.size(), store_size);
        assert_eq!(segment.next_offset(), 19);

        // Maxed index
        assert!(segment.is_maxed());
        drop(segment);

        // Maxed store
        let value_len = want.value.len() as u64;
        let segment = Segment::new(dir.path(), 16, &config(value_len * 3, 1024)).unwrap();
        assert_eq!(segment.next_offset(), 19);
        assert!(segment.is_maxed());

        segment.remove().unwrap();
        assert!(!segment_file_path(dir.path(), 16, SegmentFile::Store).exists());
        assert!(!segment_file_path(dir.path(), 16, SegmentFile::Index).exists());

        let segment = Segment::new(dir.path(), 16, &config(value_len * 3, 1024)).unwrap();
        assert!(!segment.is_maxed());
        assert!(segment.is_empty());
        assert_eq!(segment.highest_offset(), None);
    }

    #[test]
    fn test_reopen_recovers_next_offset() {
        let dir = TempDir::new().unwrap();
        let config = config(1024, 1024);

        let mut segment = Segment::new(dir.path(), 5, &config).unwrap();
        segment.append(&mut Record::new("a")).unwrap();
        segment.append(&mut Record::new("b")).unwrap();
        let (relative, position) = segment.index.last().unwrap();
        segment.close().unwrap();
        drop(segment);

        let segment = Segment::new(dir.path(), 5, &config).unwrap();
        assert_eq!(segment.next_offset(), 7);
        assert_eq!(segment.highest_offset(), Some(6));
        assert_eq!(segment.index.last().unwrap(), (relative, position));
        assert_eq!(segment.read(6).unwrap().value, b"b".to_vec());
    }

    #[test]
    fn test_read_below_base_offset() {
        let dir = TempDir::new().unwrap();
        let segment = Segment::new(dir.path(), 10, &config(1024, 1024)).unwrap();
        assert!(matches!(segment.read(3), Err(Error::IndexOutOfRange(3))));
    }

    #[test]
    fn test_parse_segment_file_name() {
        assert_eq!(
            parse_segment_file_name("16.store").unwrap(),
            (16, SegmentFile::Store)
        );
        assert_eq!(
            parse_segment_file_name("0.index").unwrap(),
            (0, SegmentFile::Index)
        );
        for name in ["16", "abc.store", "+3.index", ".store", "16.log", "1.2.index"] {
            assert!(
                matches!(parse_segment_file_name(name), Err(Error::MalformedFileName(_))),
                "{} should be rejected",
                name
            );
        }
    }
}
