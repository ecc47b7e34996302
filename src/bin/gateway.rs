//! J1939 to Modbus RTU gateway daemon
//!
//! Usage: j1939-gateway --can-interface can0 --serial-port /dev/ttyUSB0 --slave-id 1
//!
//! The CAN interface must already be up at 250 kbit/s, e.g.
//! `ip link set can0 up type can bitrate 250000`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use j1939_modbus_gateway::{
    Gateway, GatewayConfig, GatewayResult, SerialParity, SerialPortTransport,
    SocketCanTransceiver,
};

#[derive(Parser, Debug)]
#[command(name = "j1939-gateway")]
#[command(about = "Serve J1939 engine data to a Modbus RTU master", long_about = None)]
#[command(version)]
struct Args {
    /// JSON configuration file; command-line flags override it
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// SocketCAN interface
    #[arg(long)]
    can_interface: Option<String>,

    /// RS-485 serial device
    #[arg(short = 'p', long)]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Serial parity (none, even, odd)
    #[arg(long)]
    parity: Option<SerialParity>,

    /// Modbus slave address (1-247)
    #[arg(short, long)]
    slave_id: Option<u8>,

    /// Flag CAN data stale after this many milliseconds without a frame
    #[arg(long)]
    stale_timeout_ms: Option<u32>,

    /// Control loop period in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Log level when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Hex dump every Modbus frame (debug level)
    #[arg(long)]
    packet_logging: bool,
}

impl Args {
    fn gateway_config(&self) -> GatewayResult<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_json(&std::fs::read_to_string(path)?)?,
            None => GatewayConfig::default(),
        };

        if let Some(iface) = &self.can_interface {
            config = config.with_can_interface(iface.clone());
        }
        if let Some(port) = &self.serial_port {
            config = config.with_serial_port(port.clone());
        }
        if let Some(baud) = self.baud {
            config = config.with_baud_rate(baud);
        }
        if let Some(parity) = self.parity {
            config = config.with_parity(parity);
        }
        if let Some(slave_id) = self.slave_id {
            config = config.with_slave_id(slave_id);
        }
        if let Some(timeout) = self.stale_timeout_ms {
            config = config.with_stale_timeout_ms(timeout);
        }
        if let Some(ms) = self.poll_interval_ms {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }
        if self.packet_logging {
            config = config.with_packet_logging(true);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> GatewayResult<()> {
    let args = Args::parse();
    init_logging(&args.log_level);
    info!("{}", j1939_modbus_gateway::info());

    let config = args.gateway_config()?;

    let can = match SocketCanTransceiver::open(&config.can_interface) {
        Ok(can) => Some(can),
        Err(e) => {
            error!("CAN driver start failed: {}", e);
            None
        }
    };
    let serial = SerialPortTransport::open(&config.serial)?;

    let mut gateway = Gateway::new(config, can, serial)?;
    gateway
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let stats = gateway.stats();
    info!(
        "CAN frames: {} received, {} decoded; Modbus: {:?}",
        stats.frames_received,
        stats.frames_decoded,
        gateway.server_stats()
    );
    Ok(())
}
