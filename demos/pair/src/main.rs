//! Device and driver pairing demo.
//!
//! Starts a forwarding relay on localhost, then a device and a driver that
//! both connect to it, authenticate each other and trade one command each
//! way.
//!
//!   cargo run -p tether-demo-pair -- --port 9300 --secret hunter2

mod relay;

use std::net::SocketAddr;
use std::time::Duration;
use tether_client::{
    Command, Communicator, CommunicatorConfig, DeviceDescriptor, DriverDescriptor, PeerIdentity,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tether_client=info".parse()?)
                .add_directive("tether_demo_pair=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(9300);
    let secret = parse_arg_string(&args, "--secret").unwrap_or_else(|| "tether-demo".into());

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await?;
    let relay = tokio::spawn(relay::run(listener));

    let url = format!("ws://{addr}");
    let device = Communicator::new(
        CommunicatorConfig::new(&url, &secret),
        PeerIdentity::Device(DeviceDescriptor {
            id: "demo-device".into(),
            name: "Demo Device".into(),
            platform: std::env::consts::OS.into(),
            os_version: None,
        }),
    )?;
    let driver = Communicator::new(
        CommunicatorConfig::new(&url, &secret),
        PeerIdentity::Driver(DriverDescriptor {
            id: "demo-driver".into(),
            name: "Demo Driver".into(),
            app_id: "com.example.demo".into(),
        }),
    )?;

    device.on_connectivity_changed(|online| tracing::info!(online, "Device connectivity"));
    driver.on_connectivity_changed(|online| tracing::info!(online, "Driver connectivity"));

    device.activate()?;
    driver.activate()?;
    let mut device_inbound = device.subscribe()?;
    let mut driver_inbound = driver.subscribe()?;

    // queued until the handshake completes
    let mut payload = serde_json::Map::new();
    payload.insert("x".into(), 120.into());
    payload.insert("y".into(), 480.into());
    driver.submit(Command::custom("tap", payload));

    let exchange = async {
        let tap = device_inbound.recv().await?;
        tracing::info!(kind = tap.kind(), id = %tap.id, "Device received");
        device.submit(Command::custom("tapped", Default::default()));

        let reply = driver_inbound.recv().await?;
        tracing::info!(kind = reply.kind(), id = %reply.id, "Driver received");
        anyhow::Ok(())
    };
    match tokio::time::timeout(Duration::from_secs(30), exchange).await {
        Ok(result) => result?,
        Err(_) => tracing::warn!("No exchange within 30s"),
    }

    device.deactivate().await;
    driver.deactivate().await;
    relay.abort();
    Ok(())
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
