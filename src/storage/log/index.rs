use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::warn;

use crate::common::{ByteOrder, Error, Result};

pub const OFFSET_WIDTH: u64 = 4;
pub const POSITION_WIDTH: u64 = 8;
pub const ENTRY_WIDTH: u64 = OFFSET_WIDTH + POSITION_WIDTH;

/// Slot that resolves to the last written entry.
pub const LAST_ENTRY: i64 = -1;

/// Memory-mapped table of `(relative offset, store position)` entries.
///
/// The file is grown to its full capacity when opened so entries can be
/// written straight into the map, and shrunk back to the written size when
/// the index is closed.
pub struct Index {
    path: PathBuf,
    file: File,
    mmap: Option<MmapMut>,
    size: u64,
    byte_order: ByteOrder,
}

impl Index {
    pub fn open(
        path: impl Into<PathBuf>,
        max_index_bytes: u64,
        byte_order: ByteOrder,
    ) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Self::new(file, path, max_index_bytes, byte_order)
    }

    pub fn new(
        file: File,
        path: PathBuf,
        max_index_bytes: u64,
        byte_order: ByteOrder,
    ) -> Result<Self> {
        let len = file.metadata()?.len();
        // A torn trailing entry is not an entry.
        let size = len - len % ENTRY_WIDTH;

        // Never shrink below what is already written, even if the limit went down.
        file.set_len(max_index_bytes.max(size))?;

        // SAFETY: the file is opened read-write, owned by this index and only
        // resized again after the map is dropped in `close`.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Index {
            path,
            file,
            mmap: Some(mmap),
            size,
            byte_order,
        })
    }

    /// Reads the entry in `slot`, or the last entry for [`LAST_ENTRY`].
    pub fn read(&self, slot: i64) -> Result<(u32, u64)> {
        if self.size == 0 {
            return Err(Error::IndexEmpty);
        }

        let slot = match slot {
            LAST_ENTRY => self.size / ENTRY_WIDTH - 1,
            s if s < 0 => return Err(Error::IndexOutOfRange(s as u64)),
            s => s as u64,
        };
        if (slot + 1) * ENTRY_WIDTH > self.size {
            return Err(Error::IndexOutOfRange(slot));
        }

        let start = (slot * ENTRY_WIDTH) as usize;
        let entry = &self.map()?[start..start + ENTRY_WIDTH as usize];

        let mut offset = [0u8; OFFSET_WIDTH as usize];
        offset.copy_from_slice(&entry[..OFFSET_WIDTH as usize]);
        let mut position = [0u8; POSITION_WIDTH as usize];
        position.copy_from_slice(&entry[OFFSET_WIDTH as usize..]);

        Ok((
            self.byte_order.read_u32(offset),
            self.byte_order.read_u64(position),
        ))
    }

    pub fn last(&self) -> Result<(u32, u64)> {
        self.read(LAST_ENTRY)
    }

    /// Appends an entry after the last written one.
    pub fn write(&mut self, offset: u32, position: u64) -> Result<()> {
        if !self.has_room()? {
            return Err(Error::CapacityExceeded);
        }

        let byte_order = self.byte_order;
        let start = self.size as usize;
        let map = self.map_mut()?;
        map[start..start + OFFSET_WIDTH as usize].copy_from_slice(&byte_order.u32_bytes(offset));
        map[start + OFFSET_WIDTH as usize..start + ENTRY_WIDTH as usize]
            .copy_from_slice(&byte_order.u64_bytes(position));

        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Whether one more entry fits in the mapped region.
    pub fn has_room(&self) -> Result<bool> {
        Ok(self.map()?.len() as u64 >= self.size + ENTRY_WIDTH)
    }

    /// Bytes of entries written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmaps, syncs and truncates the file down to the written entries.
    /// Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
            drop(mmap);
            self.file.sync_all()?;
            self.file.set_len(self.size)?;
        }
        Ok(())
    }

    fn map(&self) -> Result<&[u8]> {
        match &self.mmap {
            Some(mmap) => Ok(&mmap[..]),
            None => Err(closed(&self.path)),
        }
    }

    fn map_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.mmap {
            Some(mmap) => Ok(&mut mmap[..]),
            None => Err(closed(&self.path)),
        }
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = %self.path.display(), err = %err, "failed to close index");
        }
    }
}

fn closed(path: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("index {} is closed", path.display()),
    ))
}
