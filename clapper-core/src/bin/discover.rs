//! VBAN discovery listener.
//!
//! Binds the VBAN port without filtering on a sender, and prints senders as
//! they appear and disappear. Useful for finding stream addresses before
//! running `detect` with a `vban://` source.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clapper_core::protocol::VBAN_PORT;
use clapper_core::session::vban::{VbanConfig, VbanSession};
use clapper_core::session::AudioSession;
use clapper_core::SourceRegistry;

#[derive(Debug)]
struct Args {
    port: u16,
}

fn parse_args() -> Result<Args, String> {
    let mut port = VBAN_PORT;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--port" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --port".into());
                };
                port = v
                    .parse::<u16>()
                    .map_err(|_| "invalid value for --port".to_string())?;
            }
            "--help" | "-h" => {
                println!("Usage: cargo run -p clapper-core --bin discover -- [--port <udp-port>]");
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    Ok(Args { port })
}

fn main() {
    if let Err(e) = run() {
        eprintln!("discover failed: {e}");
        std::process::exit(1);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clapper=info".parse().unwrap()),
        )
        .init();

    let args = parse_args()?;
    let registry = Arc::new(SourceRegistry::new());
    let mut session = VbanSession::new(
        VbanConfig {
            bind_port: args.port,
            target: None,
        },
        1.0,
        Arc::clone(&registry),
    );
    session.start().map_err(|e| e.to_string())?;
    println!("listening for VBAN senders on UDP port {} — ctrl-c to exit", args.port);

    let mut known: HashMap<SocketAddr, String> = HashMap::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let sources = registry.snapshot();
                for source in &sources {
                    if !known.contains_key(&source.addr) {
                        println!(
                            "+ {} \"{}\" {} Hz, {} ch",
                            source.addr, source.stream_name, source.sample_rate, source.channels
                        );
                        known.insert(source.addr, source.stream_name.clone());
                    }
                }
                known.retain(|addr, name| {
                    let live = sources.iter().any(|s| s.addr == *addr);
                    if !live {
                        println!("- {addr} \"{name}\" gone");
                    }
                    live
                });
            }
        }
    }

    session.stop();
    Ok(())
}
