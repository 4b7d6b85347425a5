//! Autoguider service daemon library
//!
//! The daemon glues three pieces together: the CIL command server on the
//! autoguider command port, the guide loop that feeds the TCS guide port,
//! and the status reporter that sweeps datums into the SDB.

pub mod config;
pub mod guide_loop;
pub mod server;
pub mod status;

pub use guide_loop::GuideLoop;
pub use server::CommandServer;
pub use status::StatusReporter;
