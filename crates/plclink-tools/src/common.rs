use clap::Args;
use plclink_client::{ClientConfig, ModbusClient};
use plclink_datalink::{Connector, DataLinkError, ModbusTcpTransport, TcpConnector};
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct TcpConnectionArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 502)]
    pub port: u16,
    /// Connect and response timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub timeout: u64,
    #[arg(long, default_value_t = 1)]
    pub unit_id: u8,
}

impl TcpConnectionArgs {
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.host.clone(), self.port)
            .with_connect_timeout(Duration::from_millis(self.timeout))
    }
}

pub async fn build_client(
    args: &TcpConnectionArgs,
) -> Result<ModbusClient<ModbusTcpTransport>, DataLinkError> {
    let transport = args.connector().connect().await?;
    let config =
        ClientConfig::default().with_response_timeout(Duration::from_millis(args.timeout));
    Ok(ModbusClient::with_config(transport, config))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

pub fn parse_bool(input: &str) -> Result<bool, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(format!("invalid bool value: {input}")),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn bool_spellings() {
        for on in ["1", "true", "ON", " yes "] {
            assert_eq!(parse_bool(on), Ok(true));
        }
        for off in ["0", "False", "off", "no"] {
            assert_eq!(parse_bool(off), Ok(false));
        }
        assert!(parse_bool("maybe").is_err());
    }
}
