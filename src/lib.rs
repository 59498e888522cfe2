//! fleetshell - cached SSH shell sessions for test-automation hosts
//!
//! Connects to fleet hosts over russh, keeps one interactive shell per host
//! with a background reader capturing its output, and hands out cached
//! [`SessionHandle`]s that expire after a TTL.

pub mod config;
pub mod error;
pub mod session;
pub mod ssh;

#[cfg(test)]
mod testing;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{ConnectionParameters, Credential, Fingerprint, PtyConfig, SessionSettings};
pub use error::SessionError;
pub use session::{dump_output, parse, SessionCache, SessionHandle};
pub use ssh::{RusshTransport, TransportError};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Logs go to stderr so
/// command output on stdout stays clean. Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
