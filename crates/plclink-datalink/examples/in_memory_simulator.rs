use plclink_datalink::{Connector, DataLink, ModbusTcpServer, SimulatedPlc, TcpConnector};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let plc = Arc::new(SimulatedPlc::new(16, 16, 128));
    plc.set_holding_register(100, 235)?;

    let server = ModbusTcpServer::bind("127.0.0.1:0", Arc::clone(&plc)).await?;
    let port = server.local_addr()?.port();
    let server_task = tokio::spawn(server.run());

    let link = TcpConnector::new("127.0.0.1", port).connect().await?;
    let mut response = [0u8; 253];
    let len = link
        .exchange(1, &[0x03, 0x00, 0x64, 0x00, 0x01], &mut response)
        .await?;
    println!("response pdu: {:02X?}", &response[..len]);

    link.close().await;
    server_task.abort();
    let _ = server_task.await;
    Ok(())
}
