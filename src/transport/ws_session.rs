//! One WebSocket = one Connection = two tasks. The reader decodes frames and
//! feeds the dispatcher under a heartbeat-extended deadline; the writer
//! drains the bounded send queue, coalescing bursts into a single socket
//! message. A shared cancellation token ties the two together with the
//! room's force-drop path.

use crate::app::{App, ConnSession};
use crate::game::constants::{
    MAX_INBOUND_FRAME_BYTES, PING_PERIOD, PONG_WAIT, SEND_QUEUE_CAPACITY, WRITE_WAIT,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The bounded queue is full; the consumer is too slow to keep.
    Full,
    /// The writer is gone.
    Closed,
}

/// Cloneable sending side of a Connection. The queue is bounded and never
/// blocks: overflow is a signal to drop the connection, not to wait.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: String,
    sender: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn channel(conn_id: String, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                conn_id,
                sender,
                closed: CancellationToken::new(),
            },
            receiver,
        )
    }

    pub fn id(&self) -> &str {
        &self.conn_id
    }

    pub fn send(&self, frame: String) -> Result<(), SendError> {
        self.sender.try_send(frame).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Tears the connection down; both the reader and the writer observe
    /// this and exit.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

pub async fn handle_socket(socket: WebSocket, app: Arc<App>) {
    let (sink, stream) = socket.split();
    let conn_id = Uuid::new_v4().to_string();
    let (handle, outbound) = ConnectionHandle::channel(conn_id, SEND_QUEUE_CAPACITY);

    let writer = tokio::spawn(write_loop(sink, outbound, handle.closed.clone()));

    read_loop(stream, &app, &handle).await;

    handle.close();
    let _ = writer.await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, app: &Arc<App>, handle: &ConnectionHandle) {
    let mut session = ConnSession::new(handle.clone());
    loop {
        let message = tokio::select! {
            _ = handle.closed.cancelled() => break,
            next = timeout(PONG_WAIT, stream.next()) => match next {
                // Nothing arrived inside the heartbeat window.
                Err(_) => break,
                Ok(None) => break,
                Ok(Some(Err(_))) => break,
                Ok(Some(Ok(message))) => message,
            },
        };
        match message {
            Message::Text(text) => {
                if text.len() > MAX_INBOUND_FRAME_BYTES {
                    tracing::warn!(
                        conn_id = %handle.id(),
                        size = text.len(),
                        "inbound frame too large, closing"
                    );
                    break;
                }
                app.dispatch(&mut session, &text).await;
            }
            // Any heartbeat traffic already extended the deadline above.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {}
        }
    }

    if let Some(room) = session.room.take() {
        room.unregister(handle.id()).await;
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    closed: CancellationToken,
) {
    let mut last_write = Instant::now();
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let batch = coalesce_pending(frame, &mut outbound);
                if write_with_deadline(&mut sink, Message::Text(batch)).await.is_err() {
                    closed.cancel();
                    break;
                }
                last_write = Instant::now();
            }
            _ = sleep_until(last_write + PING_PERIOD) => {
                if write_with_deadline(&mut sink, Message::Ping(Vec::new())).await.is_err() {
                    closed.cancel();
                    break;
                }
                last_write = Instant::now();
            }
        }
    }
    let _ = sink.close().await;
}

/// Frames already queued behind the one just dequeued ride the same socket
/// message, newline-separated. Order within the batch is queue order.
fn coalesce_pending(first: String, outbound: &mut mpsc::Receiver<String>) -> String {
    let mut batch = first;
    while let Ok(next) = outbound.try_recv() {
        batch.push('\n');
        batch.push_str(&next);
    }
    batch
}

async fn write_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> Result<(), ()> {
    match timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
