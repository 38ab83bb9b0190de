// ============================================================================
// Reference Consumer
// ============================================================================
//
// Accepts PROCESS frames from the leading dispatcher, logs the payload and
// acknowledges it by flipping the command byte and sending the very same frame
// to the acknowledger.
//
// Environment:
// - CONSUMER_PORT      port the dispatcher connects to (default 6969)
// - ACKNOWLEDGER_URL   where ACKs go (default ws://127.0.0.1:7124)
// - RUST_LOG           log filter (default info)
//
// ============================================================================

use anyhow::{Context, Result};
use asynchroza_dispatcher::retry::retry_with_backoff;
use asynchroza_wire::{Command, acknowledge_in_place, decode};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 6969;
const DEFAULT_ACKNOWLEDGER_URL: &str = "ws://127.0.0.1:7124";
const MAX_CONNECT_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = match std::env::var("CONSUMER_PORT") {
        Ok(raw) => raw
            .parse::<u16>()
            .with_context(|| format!("CONSUMER_PORT is not a valid port: {raw}"))?,
        Err(_) => DEFAULT_PORT,
    };
    let acknowledger_url =
        std::env::var("ACKNOWLEDGER_URL").unwrap_or_else(|_| DEFAULT_ACKNOWLEDGER_URL.to_string());

    info!("=== Consumer Starting ===");
    info!(port, acknowledger = %acknowledger_url, "Configuration loaded");

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind consumer port {port}"))?;

    let (acks, pending_acks) = mpsc::unbounded_channel();
    let mut forwarder = tokio::spawn(forward_acks(acknowledger_url, pending_acks));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted.context("Accept failed")?;
                tokio::spawn(handle_dispatcher(stream, addr, acks.clone()));
            }
            finished = &mut forwarder => {
                return match finished {
                    Ok(result) => result,
                    Err(e) => Err(e).context("ACK forwarder panicked"),
                };
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                forwarder.abort();
                return Ok(());
            }
        }
    }
}

async fn handle_dispatcher(
    stream: TcpStream,
    addr: SocketAddr,
    acks: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    info!(peer = %addr, "Dispatcher connected");

    while let Some(message) = ws.next().await {
        match message {
            Ok(WsMessage::Binary(data)) => {
                if let Some(ack) = process_frame(data) {
                    if acks.send(ack).is_err() {
                        error!("ACK forwarder is gone");
                        return;
                    }
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(peer = %addr, error = %e, "Dispatcher connection error");
                break;
            }
        }
    }

    info!(peer = %addr, "Dispatcher disconnected");
}

/// Handle one frame from the dispatcher, returning the ACK frame to send back
fn process_frame(mut frame: Vec<u8>) -> Option<Vec<u8>> {
    let decoded = match decode(&frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "Dropping malformed frame");
            return None;
        }
    };

    if decoded.command != Command::Process {
        debug!(command = %decoded.command, "Ignoring frame");
        return None;
    }

    info!(payload = %decoded.message, "Processing message");

    acknowledge_in_place(&mut frame).ok()?;
    Some(frame)
}

/// Ship ACK frames to the acknowledger over one long-lived connection.
///
/// A frame whose send failed is retried on the next connection. Returns an error once
/// the acknowledger stays unreachable for [`MAX_CONNECT_ATTEMPTS`] attempts in a row.
async fn forward_acks(url: String, mut pending: mpsc::UnboundedReceiver<Vec<u8>>) -> Result<()> {
    let mut unsent: Option<Vec<u8>> = None;

    loop {
        let mut ws = connect_acknowledger(&url).await?;
        info!(url = %url, "Connected to acknowledger");

        loop {
            let frame = match unsent.take() {
                Some(frame) => frame,
                None => match pending.recv().await {
                    Some(frame) => frame,
                    None => return Ok(()),
                },
            };

            if let Err(e) = ws.send(WsMessage::Binary(frame.clone())).await {
                warn!(url = %url, error = %e, "Lost acknowledger connection");
                unsent = Some(frame);
                break;
            }
        }
    }
}

type AckStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn connect_acknowledger(url: &str) -> Result<AckStream> {
    let (ws, _) = retry_with_backoff(
        "acknowledger_connect",
        MAX_CONNECT_ATTEMPTS,
        INITIAL_BACKOFF,
        |_| tokio_tungstenite::connect_async(url),
    )
    .await
    .with_context(|| {
        format!("Acknowledger unreachable after {MAX_CONNECT_ATTEMPTS} attempts: {url}")
    })?;
    Ok(ws)
}
