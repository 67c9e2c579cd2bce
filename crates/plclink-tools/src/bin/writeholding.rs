use clap::Parser;
use plclink_tools::common::{build_client, init_tracing, TcpConnectionArgs};

#[derive(Debug, Parser)]
#[command(
    name = "writeholding",
    about = "Write one or more holding registers (FC06/FC16)"
)]
struct Args {
    #[command(flatten)]
    conn: TcpConnectionArgs,
    #[arg(long)]
    start: u16,
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    values: Vec<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let client = build_client(&args.conn).await?;

    if let [value] = args.values.as_slice() {
        client
            .write_single_register(args.conn.unit_id, args.start, *value)
            .await?;
    } else {
        client
            .write_multiple_registers(args.conn.unit_id, args.start, &args.values)
            .await?;
    }

    println!(
        "wrote {} register(s) starting at {}",
        args.values.len(),
        args.start
    );
    client.close().await;
    Ok(())
}
