//! Wire-level data types shared by every transport.

pub mod error;
pub mod message;

pub use error::*;
pub use message::*;
