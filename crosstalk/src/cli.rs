//! CLI argument types for `crosstalk serve`.
//!
//! Defined apart from `main.rs` so integration tests can construct them
//! directly.

use clap::Args;

/// Arguments for `crosstalk serve`.
///
/// Serves an MCP session over stdio by default, or over HTTP+SSE when
/// `--http` is given.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address for the HTTP+SSE transport (e.g. "127.0.0.1:8080").
    /// Omit to serve over stdio.
    #[arg(long)]
    pub http: Option<String>,

    /// Require this bearer token on the HTTP transport.
    #[arg(long, requires = "http")]
    pub bearer_token: Option<String>,

    /// Server name reported in the handshake.
    #[arg(long, default_value = "crosstalk")]
    pub name: String,

    /// Enable debug logging (stderr).
    #[arg(long)]
    pub verbose: bool,
}
