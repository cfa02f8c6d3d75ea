//! Standalone entry point for the triptych language server.

use clap::Parser;

#[derive(Parser)]
#[command(name = "triptych-ls")]
#[command(about = "Language server for Triptych composite documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Use stdio for communication (default)
    #[arg(long, default_value = "true")]
    stdio: bool,

    /// TCP port for socket communication
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = if let Some(port) = cli.port {
        triptych::serve_tcp(port).await
    } else {
        triptych::serve().await
    };

    if let Err(e) = result {
        eprintln!("LSP server error: {}", e);
        std::process::exit(1);
    }
}
