use clap::Parser;
use plclink_tools::common::{build_client, init_tracing, TcpConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "readdiscrete", about = "Read discrete inputs (FC02)")]
struct Args {
    #[command(flatten)]
    conn: TcpConnectionArgs,
    #[arg(long)]
    start: u16,
    #[arg(long, default_value_t = 1)]
    quantity: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let client = build_client(&args.conn).await?;

    let values = client
        .read_discrete_inputs(args.conn.unit_id, args.start, args.quantity)
        .await?;

    for (idx, value) in values.iter().enumerate() {
        println!("input={} value={}", args.start + idx as u16, value);
    }
    client.close().await;
    Ok(())
}
