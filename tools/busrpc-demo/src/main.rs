// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! busrpc demo CLI
//!
//! Serves the demo procedures and calls one of them over an in-memory
//! message bus, with client and server sharing a single connection.
//!
//! # Usage
//!
//! ```bash
//! # Query
//! busrpc-demo call greet '"world"'
//!
//! # Mutation
//! busrpc-demo call countUp 2 --mutation
//!
//! # Timeout (slow sleeps 10 s by default)
//! busrpc-demo call slow --timeout-ms 500
//!
//! # Body-folded routing, as on a v3.1.1 broker
//! busrpc-demo --protocol v3.1.1 call greet '"world"'
//!
//! # Using configuration file
//! busrpc-demo gen-config --output busrpc.toml
//! busrpc-demo --config busrpc.toml call greet '"world"'
//! ```

mod procedures;

use busrpc::{BusConfig, CallKind, CallOptions, MemoryBroker, RpcClient, ServerBuilder};
use clap::{Parser, Subcommand};
use procedures::DemoState;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// busrpc demo
#[derive(Parser, Debug)]
#[command(name = "busrpc-demo")]
#[command(about = "busrpc demo - call procedures over an in-memory message bus")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protocol level of the connection (v5, v3.1.1)
    #[arg(short, long)]
    protocol: Option<String>,

    /// Log every inbound request on the server
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call a procedure and print its result
    Call {
        /// Procedure path (greet, countUp, slow)
        path: String,

        /// Input as JSON; a bare word is sent as a string
        input: Option<String>,

        /// Issue a mutation instead of a query
        #[arg(short, long)]
        mutation: bool,

        /// Per-call timeout (milliseconds)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "busrpc.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::GenConfig { ref output } => cmd_gen_config(output),
        Commands::Call {
            ref path,
            ref input,
            mutation,
            timeout_ms,
        } => {
            let config = build_config(&args)?;
            let kind = if mutation {
                CallKind::Mutation
            } else {
                CallKind::Query
            };
            cmd_call(config, path, input.as_deref(), kind, timeout_ms).await
        }
    }
}

fn build_config(args: &Args) -> Result<BusConfig, busrpc::ConfigError> {
    let mut config = match args.config {
        Some(ref path) => BusConfig::from_file(path)?,
        None => BusConfig::default(),
    };
    if let Some(ref protocol) = args.protocol {
        config.protocol = protocol.clone();
    }
    if args.verbose {
        config.server.verbose = true;
    }
    config.validate()?;
    Ok(config)
}

fn parse_input(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn cmd_call(
    config: BusConfig,
    path: &str,
    input: Option<&str>,
    kind: CallKind,
    timeout_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let level = config.protocol_level()?;
    let broker = MemoryBroker::new();
    let conn = broker.connect(level);

    let state = DemoState::default();
    let server = ServerBuilder::new(conn.clone(), config.server.clone(), procedures::router(), {
        let state = state.clone();
        move |_| Ok(state.clone())
    })
    .on_error(|event| {
        tracing::debug!("procedure '{}' failed: {}", event.path, event.error);
    })
    .start()?;
    let client = RpcClient::new(conn, config.client.clone())?;

    tracing::info!(
        "Calling '{}' ({}) on '{}' over {:?}",
        path,
        kind,
        client.request_topic(),
        level
    );

    let mut options = CallOptions::default();
    if let Some(ms) = timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }

    let outcome = client
        .call(path, kind, input.map(parse_input), options)
        .await;

    client.shutdown();
    server.shutdown();

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            tracing::debug!(
                "{} request(s) served, counter at {}",
                server.requests_processed(),
                state.count()
            );
            Ok(())
        }
        Err(e) => {
            let error = json!({ "code": e.code(), "message": e.to_string() });
            eprintln!("{}", serde_json::to_string_pretty(&error)?);
            std::process::exit(1);
        }
    }
}

fn cmd_gen_config(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = BusConfig::default();
    let toml_str = toml::to_string_pretty(&config)?;

    // Add comments
    let content = format!(
        r#"# busrpc Configuration
# Generated by busrpc-demo gen-config
#
# protocol: "v5" carries correlation data as message properties,
#           "v3.1.1" folds it into the JSON body.
# client.response_topic defaults to "<request_topic>/response".

{}
"#,
        toml_str
    );

    std::fs::write(output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}
