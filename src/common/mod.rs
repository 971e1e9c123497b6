pub mod byte_order;
pub mod error;

pub use byte_order::ByteOrder;
pub use error::{Error, Result};
