//! Document management for the LSP server.
//!
//! This module handles document storage, versioning, incremental changes,
//! and the two-phase close protocol.

mod store;

pub use store::*;
