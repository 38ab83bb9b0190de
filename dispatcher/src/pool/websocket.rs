use super::transport::{Connection, ConnectionEvents, Transport};
use crate::error::ConnectionError;
use crate::retry::retry_with_backoff;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// `host:port` endpoints get the plain WebSocket scheme
pub fn websocket_url(url: &str) -> String {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        format!("ws://{}", url)
    }
}

/// Outbound WebSocket connections to consumers, one I/O task each
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    connect_attempts: u32,
    connect_backoff: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_attempts: u32, connect_backoff: Duration) -> Self {
        Self {
            connect_attempts,
            connect_backoff,
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str, events: Arc<dyn ConnectionEvents>) -> Arc<dyn Connection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive_connection(
            url.to_string(),
            self.connect_attempts,
            self.connect_backoff,
            rx,
            events,
        ));

        Arc::new(WebSocketConnection {
            url: url.to_string(),
            tx,
            task: task.abort_handle(),
        })
    }
}

struct WebSocketConnection {
    url: String,
    tx: mpsc::UnboundedSender<Bytes>,
    task: AbortHandle,
}

impl Connection for WebSocketConnection {
    fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.tx
            .send(frame)
            .map_err(|_| ConnectionError::Closed(self.url.clone()))
    }

    fn close(&self) {
        self.task.abort();
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive_connection(
    url: String,
    attempts: u32,
    backoff: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    events: Arc<dyn ConnectionEvents>,
) {
    let ws_url = websocket_url(&url);
    let connected = retry_with_backoff("consumer_connect", attempts, backoff, |_| {
        connect_async(ws_url.as_str())
    })
    .await;

    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            events.on_error(ConnectionError::ConnectFailed {
                url,
                attempts: attempts.max(1),
                reason: e.to_string(),
            });
            return;
        }
    };

    tracing::info!(url = %url, "Connected to consumer");
    events.on_open();

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    // Handle dropped
                    let _ = sink.close().await;
                    return;
                };
                if let Err(e) = sink.send(WsMessage::Binary(frame.to_vec())).await {
                    events.on_error(ConnectionError::Transport {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!(url = %url, "Consumer closed connection");
                    events.on_close();
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.on_error(ConnectionError::Transport {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConnectionEvents for Recorder {
        fn on_open(&self) {
            self.events.lock().unwrap().push("open".to_string());
        }

        fn on_close(&self) {
            self.events.lock().unwrap().push("close".to_string());
        }

        fn on_error(&self, _error: ConnectionError) {
            self.events.lock().unwrap().push("error".to_string());
        }
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("127.0.0.1:6969"), "ws://127.0.0.1:6969");
        assert_eq!(websocket_url("wss://consumer"), "wss://consumer");
    }

    #[tokio::test]
    async fn test_frames_reach_consumer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            match ws.next().await {
                Some(Ok(WsMessage::Binary(data))) => data,
                other => panic!("unexpected message: {other:?}"),
            }
        });

        let recorder = Arc::new(Recorder::default());
        let transport = WebSocketTransport::new(3, Duration::from_millis(10));
        let connection = transport.open(&addr.to_string(), recorder.clone());

        connection.send(Bytes::from_static(b"frame")).unwrap();

        assert_eq!(server.await.unwrap(), b"frame".to_vec());
        assert_eq!(recorder.events.lock().unwrap().first().map(String::as_str), Some("open"));
    }

    #[tokio::test]
    async fn test_unreachable_consumer_reports_error() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let transport = WebSocketTransport::new(2, Duration::from_millis(10));
        let _connection = transport.open(&addr.to_string(), recorder.clone());

        for _ in 0..100 {
            if !recorder.events.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(*recorder.events.lock().unwrap(), vec!["error".to_string()]);
    }
}
