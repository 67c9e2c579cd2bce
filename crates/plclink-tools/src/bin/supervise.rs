use clap::Parser;
use plclink_supervisor::{Supervisor, SupervisorConfig};
use plclink_tools::common::init_tracing;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "supervise",
    about = "Poll tags, track alarms and log everything from a JSON configuration"
)]
struct Args {
    #[arg(long, default_value = "config/config.json")]
    config: PathBuf,
    /// Overrides the configured PLC host.
    #[arg(long)]
    host: Option<String>,
    /// Overrides the configured PLC port.
    #[arg(long)]
    port: Option<u16>,
    /// Write the effective configuration back to `--config` before starting.
    #[arg(long)]
    save: bool,
    /// Print each snapshot as JSON instead of one line per tag.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let mut config = SupervisorConfig::load_or_default(&args.config)?;
    if let Some(host) = args.host {
        config.modbus.host = host;
    }
    if let Some(port) = args.port {
        config.modbus.port = port;
    }
    if args.save {
        config.save(&args.config)?;
    }

    let supervisor = Supervisor::from_config(&config)?;
    let mut states = supervisor.subscribe_transitions();
    let mut alarms = supervisor.subscribe_alarms();
    let mut values = supervisor.subscribe_values();
    supervisor.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            transition = states.recv() => {
                if let Ok(t) = transition {
                    println!("connection {} -> {}", t.from, t.to);
                }
            }
            entry = alarms.recv() => {
                if let Ok(entry) = entry {
                    println!("alarm {} {} at {}", entry.alarm_id, entry.transition, entry.timestamp);
                }
            }
            changed = values.changed() => {
                if changed.is_err() {
                    warn!("value channel closed");
                    break;
                }
                let snapshot = values.borrow_and_update().clone();
                if args.json {
                    println!("{}", serde_json::to_string(&*snapshot)?);
                    continue;
                }
                for value in snapshot.iter() {
                    let shown = value
                        .scaled
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let status = if value.valid { "ok" } else if value.is_stale() { "stale" } else { "n/a" };
                    println!(
                        "cycle={} {}={} {} [{}]",
                        snapshot.cycle(),
                        value.tag.name,
                        shown,
                        value.tag.unit,
                        status
                    );
                }
            }
        }
    }

    info!("stopping");
    supervisor.stop().await;
    Ok(())
}
