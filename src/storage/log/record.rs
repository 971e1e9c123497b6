use std::borrow::Cow;

use serde_derive::{Deserialize, Serialize};

use crate::common::Result;

/// A value in the log together with the offset it was assigned on append.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Record {
    pub value: Vec<u8>,
    pub offset: u64,
}

impl Record {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Record {
            value: value.into(),
            offset: 0,
        }
    }

    /// Encodes the record as it is framed inside a store file.
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let stored = StoredRecord::V1 {
            value: Cow::Borrowed(self.value.as_slice()),
            offset: self.offset,
        };
        Ok(bincode::serialize(&stored)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let stored: StoredRecord<'static> = bincode::deserialize(bytes)?;
        match stored {
            StoredRecord::V1 { value, offset } => Ok(Record {
                value: value.into_owned(),
                offset,
            }),
        }
    }
}

/// On-disk schema. bincode writes the variant tag first, so new layouts
/// get a new variant and old files stay readable.
#[derive(Serialize, Deserialize)]
enum StoredRecord<'a> {
    V1 { value: Cow<'a, [u8]>, offset: u64 },
}
