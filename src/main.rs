//! protoc-gen-record - A protoc plugin emitting record manifests
//!
//! This binary reads a CodeGeneratorRequest from stdin and writes a
//! CodeGeneratorResponse to stdout, following the protoc plugin protocol.
//! Logs go to stderr, filtered by `PROTOC_GEN_RECORD_LOG`.

use prost::Message;
use prost_types::compiler::CodeGeneratorResponse;
use std::io::{self, Read, Write};
use tracing::{error, trace};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PROTOC_GEN_RECORD_LOG";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    if let Err(e) = run() {
        error!("protoc-gen-record: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut buf = Vec::new();
    io::stdin().read_to_end(&mut buf)?;

    // Generation failures are reported to protoc through the response
    let response =
        protoc_gen_record::generate_from_bytes(&buf).unwrap_or_else(|e| CodeGeneratorResponse {
            error: Some(e.to_string()),
            ..Default::default()
        });

    for f in &response.file {
        trace!(file = f.name.as_deref().unwrap_or("<unnamed>"), "emitting");
    }
    if let Some(ref err) = response.error {
        error!("{}", err);
    }

    let mut out = Vec::new();
    response.encode(&mut out)?;
    io::stdout().write_all(&out)?;

    Ok(())
}
