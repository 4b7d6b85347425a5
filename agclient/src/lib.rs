//! Autoguider client library (agclient)
//!
//! The TCS side of the autoguider link: a command client that opens a UDP
//! endpoint to the autoguider's command port, and a reply listener that
//! collects the asynchronous reply datagrams and matches them to commands
//! by sequence number.

pub mod client;
pub mod reply;

pub use client::*;
pub use reply::*;
