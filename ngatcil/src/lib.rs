//! NGAT Communications Interface Library (ngatcil)
//!
//! Wire-level support for talking to the telescope control system (TCS) and
//! status database (SDB) of a TTL-style 2.0m telescope: CIL packet codecs,
//! the AGS command catalogue, TCS guide packets, SDB status submission and
//! the raw UDP transport underneath them all.

pub mod command;
pub mod error;
pub mod guide;
pub mod packet;
pub mod sdb;
pub mod types;
pub mod udp;

pub use command::*;
pub use error::*;
pub use guide::*;
pub use packet::*;
pub use sdb::*;
pub use types::*;
pub use udp::*;
