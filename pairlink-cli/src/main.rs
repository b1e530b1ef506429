//! Pairlink demo driver.
//!
//! Runs the full pairing flow — key generation, display code, signaling,
//! transport bootstrap, encrypted data exchange, teardown — against
//! in-process loopback doubles, printing the host event stream.

mod loopback;

use clap::Parser;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use pairlink_session::{DataPayload, HostEvent, InitiatorSession, SessionConfig};

use crate::loopback::{LoopbackPeerFactory, LoopbackRelay};

#[derive(Parser)]
#[command(name = "pairlink")]
#[command(about = "Run a pairlink pairing flow against loopback doubles")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Log level when PAIRLINK_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_env("PAIRLINK_LOG")
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if cli.json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli);

    // The code slot stands in for the out-of-band QR scan
    let (code_tx, code_rx) = watch::channel(None);
    let connector = LoopbackRelay::new(code_rx.clone());
    let factory = LoopbackPeerFactory::new(code_rx);

    let config = SessionConfig::new("wss://loopback.invalid");
    let (session, handle, mut host) = InitiatorSession::start(config, connector, factory).await?;
    let run = tokio::spawn(session.run());

    let mut replied = false;
    while let Some(event) = host.recv().await {
        match event {
            HostEvent::DisplayCode(code) => {
                info!(%code, "display code ready, handing to the counterpart");
                let _ = code_tx.send(Some(code));
            }
            HostEvent::CheckNumber(number) => info!(check_number = %number, "verification number"),
            HostEvent::ConnectionId(id) => info!(connection_id = %id, "connection id"),
            HostEvent::SignatureCheck(signed) => {
                info!(signature_len = signed.len(), "challenge signed")
            }
            HostEvent::ReceiverVersion(version) => info!(%version, "counterpart version"),
            HostEvent::SocketConnected => info!("relay connected"),
            HostEvent::RtcInitiated => info!("transport construction started"),
            HostEvent::RtcConnected => info!("direct transport connected"),
            HostEvent::Data(payload) => {
                info!(?payload, "data from counterpart");
                if !replied {
                    replied = true;
                    handle.send(DataPayload::Structured(json!({
                        "type": "address",
                        "data": "0x0000000000000000000000000000000000000000",
                    })))?;
                    // Let the frame land before hanging up
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    handle.disconnect();
                }
            }
            HostEvent::RtcDisconnected => info!("disconnect acknowledged"),
            HostEvent::RtcClosed => info!("transport closed"),
            HostEvent::ConfirmationFailedBusy => error!("pairing rejected: peer slot occupied"),
            HostEvent::ConfirmationFailed => error!("pairing rejected: handshake invalid"),
            HostEvent::InvalidConnection => error!("pairing rejected: no counterpart"),
        }
    }

    match run.await? {
        Ok(()) => info!("session closed"),
        Err(e) => error!(error = %e, "session failed"),
    }
    Ok(())
}
