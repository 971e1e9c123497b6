use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::{ByteOrder, Result};

/// Width of the length prefix in front of every record.
pub const LEN_WIDTH: u64 = 8;

/// Append-only record file.
///
/// Each record is framed as `[len][bytes]`. Writes go through a buffer and
/// are only guaranteed to be on disk after a read, `read_at` or `close`.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    byte_order: ByteOrder,
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    buf: BufWriter<File>,
    size: u64,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>, byte_order: ByteOrder) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Self::new(file, path, byte_order)
    }

    pub fn new(file: File, path: PathBuf, byte_order: ByteOrder) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Store {
            path,
            byte_order,
            inner: Mutex::new(StoreInner {
                buf: BufWriter::new(file),
                size,
            }),
        })
    }

    /// Appends one framed record, returning the bytes written and the
    /// position the frame starts at.
    pub fn append(&self, value: &[u8]) -> Result<(u64, u64)> {
        let mut inner = self.inner.lock();
        let len = value.len() as u64;

        inner.buf.write_all(&self.byte_order.u64_bytes(len))?;
        inner.buf.write_all(value)?;

        let written = LEN_WIDTH + len;
        let position = inner.size;
        inner.size += written;
        Ok((written, position))
    }

    /// Reads the record framed at `position`.
    pub fn read(&self, position: u64) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.buf.flush()?;

        let file = inner.buf.get_mut();
        file.seek(SeekFrom::Start(position))?;

        let mut len = [0u8; LEN_WIDTH as usize];
        file.read_exact(&mut len)?;

        let mut value = vec![0u8; self.byte_order.read_u64(len) as usize];
        file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Raw positional read that ignores framing. Returns 0 at end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.buf.flush()?;

        let file = inner.buf.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        Ok(file.read(buf)?)
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered writes and syncs the file. The handle itself is
    /// released when the last owner drops the store.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.buf.flush()?;
        inner.buf.get_ref().sync_all()?;
        Ok(())
    }
}
