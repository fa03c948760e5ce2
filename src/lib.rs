//! udpbench - file-transfer benchmark client, UDP versus TCP
//!
//! The client splits a file into framed parts and sends them in random order
//! over UDP, or writes the whole file over TCP, while a peer drives the test
//! over a line-oriented control channel. The peer asks for full resends until
//! it holds every part, then reports when the transfer completed on its clock.
//! A two-point clock offset estimate translates that timestamp to the local
//! clock so throughput can be computed across hosts.
//!
//! # Features
//!
//! - Fixed 37-byte frame header with varint part numbers
//! - Fresh random send order on every pass
//! - Background control-channel reader feeding an ordered queue
//! - Clock offset estimation from a single `Time?` round trip
//! - Append-only `key=value` results log
//! - Asynchronous I/O using tokio

pub mod clock;
pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod frame;
pub mod results;
pub mod schedule;
pub mod sender;

pub use clock::ClockOffset;
pub use config::{ChunkSelector, Config, Protocol, TransportSelector, Trial};
pub use driver::{Driver, DriverCallback, DriverEvent};
pub use error::{Error, Result};
pub use frame::{FilePart, FrameError};
pub use results::{BenchmarkResult, ResultLog};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
