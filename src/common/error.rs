use thiserror::Error as ThisError;

/// Result returning Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Disk or mmap failure, passed through untouched.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A store or index has no room for one more record.
    /// The log treats this as a signal to rotate.
    #[error("segment capacity exceeded")]
    CapacityExceeded,

    #[error("index is empty")]
    IndexEmpty,

    #[error("index slot out of range: {0}")]
    IndexOutOfRange(u64),

    #[error("offset out of range: {0}")]
    OffsetOutOfRange(u64),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("malformed segment file name: {0}")]
    MalformedFileName(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("log has no active segment")]
    NoActiveSegment,
}

impl Error {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Error::CapacityExceeded)
    }

    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self, Error::OffsetOutOfRange(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::MalformedRecord(err.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::OffsetOutOfRange(offset) => {
                tonic::Status::out_of_range(format!("offset out of range: {}", offset))
            }
            other => tonic::Status::internal(other.to_string()),
        }
    }
}
