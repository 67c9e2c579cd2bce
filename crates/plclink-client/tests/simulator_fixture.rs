use plclink_client::{
    ClientConfig, ConnectionState, ModbusClient, ModbusSession, PointKind, SessionConfig,
    SessionError,
};
use plclink_datalink::{Connector, ModbusTcpServer, SimulatedPlc, TcpConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

async fn serve(
    plc: &Arc<SimulatedPlc>,
    addr: &str,
) -> (u16, CancellationToken, JoinHandle<Result<(), plclink_datalink::DataLinkError>>) {
    let server = ModbusTcpServer::bind(addr, Arc::clone(plc)).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run_until(shutdown.clone()));
    (port, shutdown, task)
}

async fn wait_for(session: &ModbusSession<TcpConnector>, state: ConnectionState) {
    let mut rx = session.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .unwrap();
}

#[tokio::test]
async fn client_reads_and_writes_the_simulator() {
    let plc = Arc::new(SimulatedPlc::new(16, 16, 256));
    plc.set_holding_register(100, 235).unwrap();
    plc.set_holding_register(101, 125).unwrap();
    plc.set_discrete_input(4, true).unwrap();
    let (port, shutdown, task) = serve(&plc, "127.0.0.1:0").await;

    let link = TcpConnector::new("127.0.0.1", port).connect().await.unwrap();
    let client = ModbusClient::with_config(
        link,
        ClientConfig::default().with_response_timeout(Duration::from_secs(1)),
    );

    assert_eq!(
        client.read_holding_registers(1, 100, 2).await.unwrap(),
        vec![235, 125]
    );
    let inputs = client
        .read_block(1, PointKind::DiscreteInput, 0, 8)
        .await
        .unwrap();
    assert_eq!(inputs.bit(4), Some(true));

    client.write_single_coil(1, 0, true).await.unwrap();
    client.write_single_register(1, 200, 1500).await.unwrap();
    client
        .write_multiple_registers(1, 210, &[0x4148, 0x0000])
        .await
        .unwrap();
    assert_eq!(plc.coil(0), Some(true));
    assert_eq!(plc.holding_register(200), Some(1500));
    assert_eq!(plc.holding_register(210), Some(0x4148));

    client.close().await;
    shutdown.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn session_recovers_after_the_plc_restarts() {
    let plc = Arc::new(SimulatedPlc::new(16, 16, 16));
    plc.set_coil(3, true).unwrap();
    let (port, shutdown, task) = serve(&plc, "127.0.0.1:0").await;

    let connector =
        TcpConnector::new("127.0.0.1", port).with_connect_timeout(Duration::from_millis(500));
    let session = ModbusSession::new(
        connector,
        SessionConfig::default()
            .with_reconnect_delay(Duration::from_millis(100))
            .with_client(ClientConfig::default().with_response_timeout(Duration::from_millis(500))),
    );
    session.start();
    wait_for(&session, ConnectionState::Connected).await;
    assert_eq!(session.read_coils(3, 1).await.unwrap(), vec![true]);

    shutdown.cancel();
    task.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = session.read_coils(3, 1).await.unwrap_err();
    assert!(matches!(err, SessionError::Communication(_)), "got {err:?}");
    assert_ne!(session.state(), ConnectionState::Connected);

    let (_, shutdown, task) = serve(&plc, &format!("127.0.0.1:{port}")).await;
    wait_for(&session, ConnectionState::Connected).await;
    session.write_coil(3, false).await.unwrap();
    assert_eq!(plc.coil(3), Some(false));

    session.stop().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    shutdown.cancel();
    task.await.unwrap().unwrap();
}
