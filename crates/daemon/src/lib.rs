#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `rsyncd_daemon` drives the server side of the rsync daemon handshake: the
//! stateful exchange that follows an accepted connection and precedes the
//! transfer phase. It negotiates a protocol version, selects a named module
//! (or lists the exported modules), optionally unlocks a restricted module
//! via challenge-response authentication, parses the peer's argument vector
//! into a typed [`TransferConfig`], and finishes by exchanging capability
//! flags and the checksum seed.
//!
//! # Design
//!
//! - [`session`] holds the state machine, [`ServerSession::handshake`], and
//!   the frozen [`TransferConfig`] it produces. It is the only module that
//!   touches the wire.
//! - [`module`] defines [`Module`], [`RestrictedModule`], the
//!   [`ModuleProvider`] trait the daemon consults, and the jail-rooted path
//!   resolution every peer-supplied name must pass.
//! - [`auth`] generates challenges and verifies responses in constant time.
//! - [`argparse`] interprets the argument vector against a declared option
//!   schema whose handlers mutate the session builder in input order.
//!
//! # Invariants
//!
//! - Every path handed to the transfer phase resolves under the selected
//!   module's root; escapes fail the handshake.
//! - A receiver-role handshake only succeeds against a writable module.
//! - Recursive file selection implies incremental recursion.
//! - The checksum seed is exactly four bytes and reaches the wire in the
//!   byte order upstream rsync uses.
//! - A [`TransferConfig`] is observable only after the handshake reached a
//!   terminal state, and only an `Ok` session carries one.
//!
//! # Errors
//!
//! [`HandshakeError`] separates failures that are echoed to the peer as an
//! `@ERROR:` line (protocol violations, authentication failures, unknown
//! modules, unconvertible text) from channel failures that can only
//! propagate. Authentication diagnostics never include the challenge, the
//! expected response, or the peer's answer.

pub mod argparse;
pub mod auth;
pub mod error;
pub mod module;
pub mod session;


pub use argparse::{ArgParseError, ArgumentParser, OptionSpec, PresencePolicy, ValuePolicy};
pub use auth::AuthContext;
pub use error::HandshakeError;
pub use module::{Module, ModuleEntry, ModuleError, ModuleProvider, ModuleRegistry, RestrictedModule};
pub use session::{FileSelection, Role, ServerSession, TransferConfig};
