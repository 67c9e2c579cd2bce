use plclink_client::{ConnectionState, ModbusSession, SessionConfig};
use plclink_datalink::TcpConnector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let session = ModbusSession::new(TcpConnector::new("127.0.0.1", 502), SessionConfig::default());
    session.start();

    let mut state = session.subscribe_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await?;

    let values = session.read_holding_registers(100, 2).await?;
    println!("holding registers 100..102: {values:?}");

    session.stop().await;
    Ok(())
}
