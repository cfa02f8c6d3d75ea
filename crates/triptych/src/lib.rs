//! # triptych
//!
//! Language server for triptych component files (`.tri`).
//!
//! ## Architecture
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                     triptych (LSP Server)                         |
//! +------------------------------------------------------------------+
//! |                                                                    |
//! |  +--------------------+     +-------------------+                  |
//! |  |   LSP Transport    |     |  Plugin Host      |                  |
//! |  |   (tower-lsp)      |<--->|  (dispatch/merge) |                  |
//! |  +--------------------+     +-------------------+                  |
//! |                                      |                             |
//! |                                      v                             |
//! |  +-----------------------------------------------------------+    |
//! |  |                   Document Store                           |    |
//! |  |  (Rope-based text, two-phase close)                        |    |
//! |  +-----------------------------------------------------------+    |
//! |                                      |                             |
//! |                                      v                             |
//! |  +-----------------------------------------------------------+    |
//! |  |                   Snapshot Layer                           |    |
//! |  |  .tri -> virtual .tri.tsx projections with trace tables    |    |
//! |  |  for bidirectional position mapping                        |    |
//! |  +-----------------------------------------------------------+    |
//! |                                      |                             |
//! |                                      v                             |
//! |  +-----------------------------------------------------------+    |
//! |  |                   Oracle Seam                              |    |
//! |  |  per-config-dir scopes over an external type checker,      |    |
//! |  |  module resolution served from snapshots before disk       |    |
//! |  +-----------------------------------------------------------+    |
//! +------------------------------------------------------------------+
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() {
//!     triptych::serve().await.unwrap();
//! }
//! ```

pub mod document;
pub mod host;
pub mod oracle;
pub mod plugins;
pub mod resolve;
pub mod server;
pub mod snapshot;

pub use host::{CapabilitySet, CompletionPolicy, Plugin, PluginContext, PluginHost};
pub use oracle::{OracleScope, StubOracle, TypeOracle};
pub use resolve::{OracleFs, VirtualFs};
pub use server::{ServerConfig, ServerState, TriptychServer};
pub use snapshot::{DocumentSnapshot, SnapshotRegistry};

use tower_lsp::{LspService, Server};

/// Initialize file-based logging to .triptych/lsp.log
fn init_file_logging() {
    use std::fs::{create_dir_all, OpenOptions};
    use std::sync::Once;
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let log_dir = std::env::current_dir()
            .ok()
            .map(|p| p.join(".triptych"))
            .unwrap_or_else(|| std::path::PathBuf::from("/tmp/triptych"));

        let _ = create_dir_all(&log_dir);

        let log_path = log_dir.join("lsp.log");

        // Try to open log file, fall back to stderr
        if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
            tracing_subscriber::fmt()
                .with_writer(file.and(std::io::stderr))
                .with_ansi(false)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
        }
    });
}

/// Start the LSP server using stdio transport.
///
/// This is the main entry point for the language server.
pub async fn serve() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_file_logging();

    tracing::info!("Starting triptych LSP server");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(TriptychServer::new);

    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

/// Start the LSP server on a TCP socket.
///
/// This is useful for debugging and testing.
pub async fn serve_tcp(port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::net::TcpListener;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting triptych LSP server on port {}", port);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Listening on 127.0.0.1:{}", port);

    let (stream, addr) = listener.accept().await?;
    tracing::info!("Accepted connection from {}", addr);

    let (read, write) = tokio::io::split(stream);

    let (service, socket) = LspService::new(TriptychServer::new);

    Server::new(read, write, socket).serve(service).await;

    Ok(())
}
