use clap::Parser;
use plclink_datalink::{ModbusTcpServer, SimulatedPlc};
use plclink_tools::common::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "plcsim", about = "Serve an in-memory PLC over Modbus TCP")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5020")]
    bind: String,
    #[arg(long, default_value_t = 64)]
    coils: usize,
    #[arg(long, default_value_t = 64)]
    discrete_inputs: usize,
    #[arg(long, default_value_t = 256)]
    holding_registers: usize,
    /// Slowly ramp the stock temperature (HR 100) and pressure (HR 101) values.
    #[arg(long)]
    animate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let plc = Arc::new(SimulatedPlc::new(
        args.coils,
        args.discrete_inputs,
        args.holding_registers,
    ));
    plc.set_holding_register(100, 235)?;
    plc.set_holding_register(101, 125)?;

    let server = ModbusTcpServer::bind(args.bind.as_str(), Arc::clone(&plc)).await?;
    let addr = server.local_addr()?;
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run_until(shutdown.clone()));
    println!("simulated plc listening on {addr}");

    if args.animate {
        let plc = Arc::clone(&plc);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            let mut step: u16 = 0;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                step = (step + 1) % 140;
                // Roughly 15 to 85 °C and 0.5 to 11.6 bar with the stock scaling.
                let _ = plc.set_holding_register(100, 150 + step * 5);
                let _ = plc.set_holding_register(101, 50 + step * 8);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    server_task.await??;
    Ok(())
}
