use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

use super::store::Store;

/// Concatenation of the raw bytes of every store in a log, oldest first.
///
/// Records keep their `[len][bytes]` framing; offsets are implied by the
/// order frames appear in.
pub struct LogReader {
    stores: VecDeque<Arc<Store>>,
    position: u64,
}

impl LogReader {
    pub(crate) fn new(stores: Vec<Arc<Store>>) -> Self {
        LogReader {
            stores: stores.into(),
            position: 0,
        }
    }
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(store) = self.stores.front() {
            let n = store.read_at(buf, self.position)?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            self.stores.pop_front();
            self.position = 0;
        }
        Ok(0)
    }
}
