//! SSH module - transport capabilities and their russh implementation
//!
//! The session layer depends only on the traits in [`transport`]. The
//! russh-backed implementation opens one connection per host, runs one
//! owner task per connection and one pump task per interactive shell.
//!
//! # Features
//! - Password and private-key authentication
//! - Interactive shell with a PTY
//! - One-shot exec channels
//! - SFTP reads

mod client;
mod error;
mod handle_owner;
mod sftp;
mod shell;
pub mod transport;

pub use client::{fingerprint, ClientHandler, RusshConnection, RusshTransport};
pub use error::TransportError;
pub use handle_owner::{spawn_handle_owner_task, HandleCommand, HandleController};
pub use sftp::RusshFileTransfer;
pub use shell::RusshShellChannel;
pub use transport::{
    ConnectTarget, Connection, ExecOutput, FileTransfer, RemoteFile, ResolvedCredential,
    ShellChannel, Transport,
};
