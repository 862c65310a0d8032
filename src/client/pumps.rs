//! Read and write loops bridging a client's connection and its queue.
//!
//! Each started client runs exactly one of each as independent tokio tasks.
//! Either loop ending closes the client, which in turn ends the other one.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use tungstenite::Error as WsError;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::protocol::frame::coding::CloseCode;

use super::hub_client::{COMPONENT, Client};
use crate::utils::error::{HubError, Result};

/// Join handles of the two tasks spawned by [`Client::start`].
#[derive(Debug)]
pub struct PumpHandles {
    pub read: JoinHandle<()>,
    pub write: JoinHandle<()>,
}

impl PumpHandles {
    /// Waits for both loops to finish.
    pub async fn join(self) {
        let _ = self.read.await;
        let _ = self.write.await;
    }
}

impl Client {
    /// Spawns the read loop over `stream` and the write loop over `sink`.
    ///
    /// Fails with [`HubError::AlreadyStarted`] if the loops already run.
    pub fn start<S, K>(self: &Arc<Self>, stream: S, sink: K) -> Result<PumpHandles>
    where
        S: Stream<Item = std::result::Result<WsMessage, WsError>> + Send + Unpin + 'static,
        K: Sink<WsMessage, Error = WsError> + Send + Unpin + 'static,
    {
        let queue = self
            .take_queue()
            .ok_or_else(|| HubError::AlreadyStarted(self.id.clone()))?;
        self.mark_started();

        let write = tokio::spawn(Arc::clone(self).write_pump(sink, queue));
        let read = tokio::spawn(Arc::clone(self).read_pump(stream));

        Ok(PumpHandles { read, write })
    }

    /// Splits an upgraded websocket and starts both loops on it.
    pub fn start_websocket<T>(self: &Arc<Self>, ws: WebSocketStream<T>) -> Result<PumpHandles>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, stream) = ws.split();
        self.start(stream, sink)
    }

    async fn read_pump<S>(self: Arc<Self>, mut stream: S)
    where
        S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
    {
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = time::timeout_at(deadline, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    warn!(
                        component = COMPONENT,
                        client_id = %self.id,
                        user_id = %self.user_id,
                        "No pong within {:?}, dropping connection",
                        self.config.pong_wait
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    if is_expected_close(&e) {
                        debug!(component = COMPONENT, client_id = %self.id, "Connection closed: {e}");
                    } else {
                        error!(
                            component = COMPONENT,
                            client_id = %self.id,
                            user_id = %self.user_id,
                            error = %e,
                            "WebSocket read error"
                        );
                    }
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                WsMessage::Text(_) | WsMessage::Binary(_) => {
                    self.handle_inbound(message.into_data().to_vec());
                }
                WsMessage::Pong(_) => {
                    deadline = Instant::now() + self.config.pong_wait;
                }
                WsMessage::Close(frame) => {
                    if let Some(frame) = frame.as_ref() {
                        if !matches!(frame.code, CloseCode::Normal | CloseCode::Away) {
                            warn!(
                                component = COMPONENT,
                                client_id = %self.id,
                                user_id = %self.user_id,
                                code = u16::from(frame.code),
                                "Abnormal close from peer"
                            );
                        }
                    }
                    break;
                }
                // tungstenite answers pings itself
                WsMessage::Ping(_) | WsMessage::Frame(_) => {}
            }
        }

        self.finish_read();
    }

    fn handle_inbound(self: &Arc<Self>, data: Vec<u8>) {
        let Some(handler) = self.on_message.as_ref() else {
            return;
        };
        if let Err(e) = handler(self, data) {
            error!(
                component = COMPONENT,
                client_id = %self.id,
                user_id = %self.user_id,
                error = %e,
                "Message handler failed"
            );
        }
    }

    fn finish_read(self: &Arc<Self>) {
        info!(
            component = COMPONENT,
            client_id = %self.id,
            user_id = %self.user_id,
            tenant_id = %self.tenant_id,
            "Client disconnected"
        );

        if let Some(handler) = self.on_disconnect.as_ref() {
            if let Err(e) = handler(self) {
                error!(
                    component = COMPONENT,
                    client_id = %self.id,
                    error = %e,
                    "Disconnect handler failed"
                );
            }
        }

        // unregisters from the hub unless an earlier close() already did
        self.close();
    }

    async fn write_pump<K>(self: Arc<Self>, mut sink: K, mut queue: mpsc::Receiver<Vec<u8>>)
    where
        K: Sink<WsMessage, Error = WsError> + Unpin,
    {
        let period = self.config.ping_period;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = queue.recv() => match next {
                    Some(first) => {
                        if let Err(e) = self.write_batch(&mut sink, first, &mut queue).await {
                            debug!(component = COMPONENT, client_id = %self.id, error = %e, "Write failed");
                            break;
                        }
                    }
                    None => {
                        // queue closed by close(): say goodbye
                        let _ = time::timeout(self.config.write_wait, sink.send(WsMessage::Close(None))).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let ping = sink.send(WsMessage::Ping(Vec::new().into()));
                    let sent = time::timeout(self.config.write_wait, ping).await;
                    if !matches!(sent, Ok(Ok(()))) {
                        debug!(component = COMPONENT, client_id = %self.id, "Ping failed");
                        break;
                    }
                }
            }
        }

        let _ = time::timeout(self.config.write_wait, sink.close()).await;
        self.close();
        self.mark_closed();
    }

    /// Writes `first` and whatever is already queued behind it, one frame per
    /// message, then flushes.
    async fn write_batch<K>(
        &self,
        sink: &mut K,
        first: Vec<u8>,
        queue: &mut mpsc::Receiver<Vec<u8>>,
    ) -> Result<()>
    where
        K: Sink<WsMessage, Error = WsError> + Unpin,
    {
        let limit = self.config.send_buffer_size;
        let write = async {
            sink.feed(to_frame(first)).await?;
            for _ in 0..limit {
                match queue.try_recv() {
                    Ok(next) => sink.feed(to_frame(next)).await?,
                    Err(_) => break,
                }
            }
            sink.flush().await?;
            Ok::<(), WsError>(())
        };

        time::timeout(self.config.write_wait, write)
            .await
            .map_err(|_| HubError::WriteTimeout(self.config.write_wait))??;
        Ok(())
    }
}

/// UTF-8 payloads go out as text frames, anything else as binary.
fn to_frame(data: Vec<u8>) -> WsMessage {
    match String::from_utf8(data) {
        Ok(text) => WsMessage::text(text),
        Err(e) => WsMessage::binary(e.into_bytes()),
    }
}

fn is_expected_close(e: &WsError) -> bool {
    matches!(e, WsError::ConnectionClosed | WsError::AlreadyClosed)
}
