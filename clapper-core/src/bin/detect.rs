//! Command-line clap detector.
//!
//! Opens one audio source, runs detection with the built-in transient scorer,
//! and prints one JSON line per accepted clap. Status changes go to stderr so
//! stdout stays machine-readable.

use clapper_core::{AudioSource, ClapEngine, DetectionConfig, ScorerHandle, TransientScorer};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug)]
struct Args {
    source: AudioSource,
    config: DetectionConfig,
    show_labels: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut source: Option<AudioSource> = None;
    let mut config = DetectionConfig::default();
    let mut show_labels = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--source" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --source".into());
                };
                source = Some(AudioSource::parse(&v).map_err(|e| e.to_string())?);
            }
            "--threshold" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --threshold".into());
                };
                config.threshold = v
                    .parse::<f32>()
                    .map_err(|_| "invalid value for --threshold".to_string())?;
            }
            "--cooldown" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --cooldown".into());
                };
                config.cooldown_seconds = v
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --cooldown".to_string())?;
            }
            "--window" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --window".into());
                };
                config.window_duration = v
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --window".to_string())?;
            }
            "--overlap" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --overlap".into());
                };
                config.overlap_factor = v
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --overlap".to_string())?;
            }
            "--target-rate" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --target-rate".into());
                };
                config.target_sample_rate = v
                    .parse::<u32>()
                    .map_err(|_| "invalid value for --target-rate".to_string())?;
            }
            "--webhook" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --webhook".into());
                };
                config.webhook_url = Some(v);
            }
            "--labels" => {
                show_labels = true;
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p clapper-core --bin detect -- \\
  --source <default|device:<n>|rtsp://…|vban://<ip>[:port]> \\
  [--threshold <0..1>] [--cooldown <secs>] [--window <secs>] \\
  [--overlap <0..1>] [--target-rate <hz>] [--webhook <url>] [--labels]"
                );
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let source = source.ok_or_else(|| "missing required --source".to_string())?;
    Ok(Args {
        source,
        config,
        show_labels,
    })
}

fn main() {
    if let Err(e) = run() {
        eprintln!("detect failed: {e}");
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
    let engine = ClapEngine::new(ScorerHandle::new(TransientScorer::default()));
    let mut claps = engine.subscribe_claps();
    let mut labels = engine.subscribe_labels();
    let mut status = engine.subscribe_status();

    engine
        .start(&args.source, args.config)
        .map_err(|e| e.to_string())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = claps.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event).map_err(|e| e.to_string())?);
                }
                Err(RecvError::Lagged(n)) => eprintln!("warning: dropped {n} clap events"),
                Err(RecvError::Closed) => break,
            },
            event = labels.recv(), if args.show_labels => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event).map_err(|e| e.to_string())?);
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            event = status.recv() => if let Ok(event) = event {
                match event.detail {
                    Some(detail) => eprintln!("status: {:?} ({detail})", event.status),
                    None => eprintln!("status: {:?}", event.status),
                }
            },
        }
    }

    engine.stop();
    Ok(())
}
