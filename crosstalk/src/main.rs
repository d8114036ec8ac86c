//! Crosstalk CLI entry point.
//!
//! `crosstalk serve` runs a server session over stdio (default) or
//! HTTP+SSE. Diagnostics go to stderr; on the stdio transport stdout
//! carries protocol frames only.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use crosstalk::cli::ServeArgs;
use crosstalk::core::protocol::types::Tool;
use crosstalk::core::SessionConfig;
use crosstalk::registry::{InMemoryTools, Registries, ToolHandler};
use crosstalk::transport::http::HttpServerTransport;
use crosstalk::transport::stdio::StdioTransport;
use crosstalk::transport::Transport;
use crosstalk::Session;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Crosstalk: bidirectional MCP engine.
#[derive(Parser)]
#[command(name = "crosstalk", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve an MCP session over stdio or HTTP+SSE.
    Serve(ServeArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Serve(args) => {
            init_tracing(args.verbose);
            run_serve(args).await
        }
    };

    std::process::exit(code);
}

async fn run_serve(args: ServeArgs) -> i32 {
    let config = SessionConfig::from_env().with_server_info(args.name, env!("CARGO_PKG_VERSION"));
    let registries = demo_registries();

    let connection = match &args.http {
        Some(addr) => {
            let mut transport = HttpServerTransport::new(addr.clone());
            if let Some(token) = &args.bearer_token {
                transport = transport.with_bearer_token(token.clone());
            }
            match transport.connect().await {
                Ok(connection) => {
                    if let Some(addr) = transport.local_addr() {
                        tracing::info!(%addr, "serving MCP over HTTP+SSE");
                    }
                    connection
                }
                Err(e) => {
                    tracing::error!(error = %e, "could not bind HTTP transport");
                    eprintln!("crosstalk serve: {e}");
                    return 1;
                }
            }
        }
        None => match StdioTransport::new().connect().await {
            Ok(connection) => {
                tracing::info!("serving MCP over stdio");
                connection
            }
            Err(e) => {
                tracing::error!(error = %e, "could not open stdio transport");
                eprintln!("crosstalk serve: {e}");
                return 1;
            }
        },
    };

    let (session, _handle) = Session::new(connection, config, registries);
    let reason = session.run().await;
    tracing::info!(%reason, "session ended");
    0
}

/// A small demo registry so a fresh build answers `tools/list` and
/// `tools/call` out of the box.
fn demo_registries() -> Registries {
    let tools = InMemoryTools::new();
    let handler: ToolHandler = Arc::new(|arguments, _ctx| {
        Box::pin(async move {
            let text = arguments
                .and_then(|a| a.get("text").and_then(|t| t.as_str()).map(String::from))
                .unwrap_or_default();
            Ok(crosstalk::core::protocol::params::CallToolResult::text(
                text,
            ))
        })
    });
    tools.register(
        Tool {
            name: "echo".into(),
            description: Some("Echo the given text back".into()),
            input_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        },
        handler,
    );
    Registries {
        tools: Arc::new(tools),
        ..Registries::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing Init
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise the tracing subscriber with stderr output.
///
/// When `verbose` is true the filter is `debug`; otherwise `RUST_LOG`
/// decides (defaulting to silence). Stdout is never used: on the stdio
/// transport it carries protocol frames.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
