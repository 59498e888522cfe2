//! Session Management Module
//!
//! Provides the session lifecycle on top of the transport traits:
//! - Connection establishment with bounded retry
//! - Per-host session cache with TTL eviction
//! - Background drainer capturing shell output
//! - Output normalization for captured terminal text

mod buffer;
pub mod cache;
mod drainer;
mod dump;
mod establish;
mod handle;
pub mod parser;
mod probe;

pub use buffer::OutputBuffers;
pub use cache::SessionCache;
pub use drainer::{StreamDrainer, CHUNK_SIZE};
pub use dump::{dump_output, OUTPUT_FILE};
pub use establish::{ConnectionEstablisher, Link};
pub use handle::SessionHandle;
pub use parser::{escape_ansi, parse, Normalizer};
pub use probe::{PingProbe, ProbeOutput, ReachabilityProbe};
