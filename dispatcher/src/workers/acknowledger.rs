use crate::error::WorkerError;
use crate::pending::PendingMessageStore;
use asynchroza_metrics::MESSAGES_ACKNOWLEDGED;
use asynchroza_redis::StoreError;
use asynchroza_wire::{Command, ProtocolError, decode};
use futures_util::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// What the acknowledger did with one received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// ACK processed; `removed` is false when the entry was already gone
    Acknowledged { removed: bool },
    /// Valid frame that is not an ACK
    Ignored(Command),
    Malformed(ProtocolError),
}

/// Receives ACK frames from consumers over WebSocket and clears their pending entries
pub struct Acknowledger {
    pending: PendingMessageStore,
    listener: TcpListener,
}

impl Acknowledger {
    /// Listen on `port` on all interfaces
    pub async fn bind(pending: PendingMessageStore, port: u16) -> Result<Self, WorkerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| WorkerError::Bind { port, source })?;
        Ok(Self { pending, listener })
    }

    pub async fn bind_addr(
        pending: PendingMessageStore,
        addr: SocketAddr,
    ) -> Result<Self, WorkerError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| WorkerError::Bind {
            port: addr.port(),
            source,
        })?;
        Ok(Self { pending, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WorkerError> {
        self.listener.local_addr().map_err(WorkerError::Listener)
    }

    /// Accept consumer connections until aborted.
    ///
    /// Accept errors are never fatal: a failed handshake only loses that connection,
    /// anything else (fd exhaustion) pauses accepting for a second.
    pub async fn run(self) -> Result<(), WorkerError> {
        info!(addr = ?self.listener.local_addr().ok(), "Acknowledger listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            connections.spawn(handle_connection(self.pending.clone(), socket, addr));
                        }
                        Err(e) => handle_accept_error(e).await,
                    }
                }
                // Reap finished connections
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

async fn handle_accept_error(e: io::Error) {
    if is_connection_error(&e) {
        debug!(error = %e, "Consumer connection dropped before accept");
        return;
    }

    error!(error = %e, "Acknowledger accept failed, backing off");
    time::sleep(ACCEPT_BACKOFF).await;
}

async fn handle_connection(pending: PendingMessageStore, socket: TcpStream, addr: SocketAddr) {
    let mut ws = match accept_async(socket).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(addr = %addr, error = %e, "WebSocket upgrade failed");
            return;
        }
    };

    debug!(addr = %addr, "Consumer connected to acknowledger");

    while let Some(message) = ws.next().await {
        match message {
            Ok(WsMessage::Binary(data)) => {
                if let Err(e) = handle_frame(&pending, &data).await {
                    warn!(addr = %addr, error = %e, "Failed to remove acknowledged message");
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => debug!(addr = %addr, "Ignoring non-binary message"),
            Err(e) => {
                warn!(addr = %addr, error = %e, "Acknowledger connection error");
                break;
            }
        }
    }

    debug!(addr = %addr, "Consumer disconnected from acknowledger");
}

/// Decode one frame and, for an ACK, drop its payload from the pending set
pub async fn handle_frame(
    pending: &PendingMessageStore,
    data: &[u8],
) -> Result<AckOutcome, StoreError> {
    let decoded = match decode(data) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "Dropping malformed frame");
            return Ok(AckOutcome::Malformed(e));
        }
    };

    if decoded.command != Command::Ack {
        info!(command = %decoded.command, "Received message that is not an ACK");
        return Ok(AckOutcome::Ignored(decoded.command));
    }

    let removed = pending.remove(&decoded.message).await?;
    MESSAGES_ACKNOWLEDGED.inc();
    debug!(removed = removed, "Message acknowledged");

    Ok(AckOutcome::Acknowledged { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use asynchroza_redis::MemoryStore;
    use asynchroza_wire::{acknowledge_in_place, encode};
    use futures_util::SinkExt;
    use std::sync::Arc;
    use std::time::Duration;

    fn pending(store: &MemoryStore) -> PendingMessageStore {
        PendingMessageStore::new(Arc::new(store.clone()), "messages:pending")
    }

    #[tokio::test]
    async fn test_ack_removes_pending_entry() {
        let store = MemoryStore::new();
        let pending = pending(&store);
        pending.add("order-42", 1_000).await.unwrap();

        let frame = encode(Command::Ack, "order-42").unwrap();
        assert_eq!(
            handle_frame(&pending, &frame).await.unwrap(),
            AckOutcome::Acknowledged { removed: true }
        );
        assert_eq!(pending.count().await.unwrap(), 0);

        // Duplicate ACK is harmless
        assert_eq!(
            handle_frame(&pending, &frame).await.unwrap(),
            AckOutcome::Acknowledged { removed: false }
        );
    }

    #[tokio::test]
    async fn test_non_ack_and_garbage_are_ignored() {
        let store = MemoryStore::new();
        let pending = pending(&store);
        pending.add("order-42", 1_000).await.unwrap();

        let process = encode(Command::Process, "order-42").unwrap();
        assert_eq!(
            handle_frame(&pending, &process).await.unwrap(),
            AckOutcome::Ignored(Command::Process)
        );

        assert!(matches!(
            handle_frame(&pending, &[9, 1, 0]).await.unwrap(),
            AckOutcome::Malformed(_)
        ));
        assert_eq!(pending.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = MemoryStore::new();
        let pending = pending(&store);
        store.set_unavailable(true);

        let frame = encode(Command::Ack, "order-42").unwrap();
        assert!(handle_frame(&pending, &frame).await.is_err());
    }

    #[tokio::test]
    async fn test_ack_over_websocket() {
        let store = MemoryStore::new();
        let pending = pending(&store);
        pending.add("order-42", 1_000).await.unwrap();

        let acknowledger = Acknowledger::bind_addr(pending.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = acknowledger.local_addr().unwrap();
        let server = tokio::spawn(acknowledger.run());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        let mut frame = encode(Command::Process, "order-42").unwrap().to_vec();
        acknowledge_in_place(&mut frame).unwrap();
        ws.send(WsMessage::Binary(frame)).await.unwrap();

        for _ in 0..100 {
            if pending.count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pending.count().await.unwrap(), 0);

        server.abort();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let store = MemoryStore::new();
        let first = Acknowledger::bind_addr(pending(&store), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        let second = Acknowledger::bind_addr(pending(&store), addr).await;
        assert!(matches!(second, Err(WorkerError::Bind { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_connection_does_not_stop_accepting() {
        let started = tokio::time::Instant::now();

        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
        ] {
            handle_accept_error(io::Error::from(kind)).await;
        }

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fd_exhaustion_backs_off_and_continues() {
        let started = tokio::time::Instant::now();

        // EMFILE
        handle_accept_error(io::Error::from_raw_os_error(24)).await;

        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_keeps_serving_after_client_resets() {
        let store = MemoryStore::new();
        let pending = pending(&store);
        pending.add("order-42", 1_000).await.unwrap();

        let acknowledger = Acknowledger::bind_addr(pending.clone(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = acknowledger.local_addr().unwrap();
        let worker = tokio::spawn(acknowledger.run());

        // Peer that goes away with a reset instead of a handshake
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        let stream = socket.connect(addr).await.unwrap();
        stream.set_zero_linger().unwrap();
        drop(stream);

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let mut frame = encode(Command::Process, "order-42").unwrap().to_vec();
        acknowledge_in_place(&mut frame).unwrap();
        ws.send(WsMessage::Binary(frame)).await.unwrap();

        for _ in 0..500 {
            if pending.count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pending.count().await.unwrap(), 0);
        assert!(!worker.is_finished());
        worker.abort();
    }
}
