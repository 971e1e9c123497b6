pub mod log;

pub use self::log::{Config, Log, LogReader, Record, SegmentConfig};
