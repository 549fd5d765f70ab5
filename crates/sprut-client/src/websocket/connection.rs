use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt, stream::SplitSink};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, info, warn};

use super::{
    config::WsConfig,
    pending::PendingCallRegistry,
    protocol::{InboundFrame, JsonRpcCodec, MessageKind},
    state::SessionState,
    types::{ConnectionEpoch, CorrelationId, LinkState},
};
use crate::{
    error::{SprutError, SprutResult},
    metrics::SessionMetrics,
};

type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) enum ControlCommand {
    Close { ack: Option<oneshot::Sender<()>> },
}

#[derive(Debug)]
pub(crate) enum DataCommand {
    Request { id: CorrelationId, payload: String },
}

/// Lifecycle notifications and unsolicited hub pushes.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A socket opened.
    Connected { epoch: ConnectionEpoch },
    /// An open socket closed. A reconnect follows unless the client was shut down.
    Disconnected {
        epoch: ConnectionEpoch,
        reason: String,
    },
    /// An `{event: ...}` frame with no correlation id.
    Unsolicited(Value),
}

/// Handle to the single hub socket and the task that owns it.
///
/// Cheap to clone. Dropping every clone shuts the driver down.
#[derive(Clone)]
pub struct TransportConnection {
    ctrl_tx: mpsc::Sender<ControlCommand>,
    cmd_tx: mpsc::Sender<DataCommand>,
    pending: Arc<PendingCallRegistry>,
    state: Arc<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    config: Arc<WsConfig>,
}

impl TransportConnection {
    /// Spawn the connection driver and return immediately.
    ///
    /// The first connect attempt runs in the background; use
    /// [`TransportConnection::connected`] to wait for the socket. Must be
    /// called from within a Tokio runtime.
    pub fn spawn(
        config: WsConfig,
        codec: JsonRpcCodec,
        state: Arc<SessionState>,
        metrics: SessionMetrics,
    ) -> SprutResult<Self> {
        config.validate().map_err(SprutError::config)?;

        let config = Arc::new(config);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let pending = Arc::new(PendingCallRegistry::new(Arc::clone(&config)));

        let driver = ConnectionDriver {
            config: Arc::clone(&config),
            codec,
            pending: Arc::clone(&pending),
            state: Arc::clone(&state),
            events: events.clone(),
            metrics,
            epoch: ConnectionEpoch::default(),
        };
        tokio::spawn(driver.run(ctrl_rx, cmd_rx));

        Ok(Self {
            ctrl_tx,
            cmd_tx,
            pending,
            state,
            events,
            config,
        })
    }

    /// Write one request frame and wait for the frame carrying the same id.
    ///
    /// Fails with `NotConnected` if the socket is not open, `ConnectionLost`
    /// if it closes before the answer arrives, and `Timeout` once the
    /// deadline passes.
    pub async fn request(
        &self,
        id: CorrelationId,
        payload: String,
        timeout_override: Option<Duration>,
    ) -> SprutResult<InboundFrame> {
        if !self.state.link().is_open() {
            return Err(SprutError::not_connected("WebSocket is not open"));
        }

        let timeout_duration = timeout_override.unwrap_or(self.config.request_timeout);
        let rx = match self.pending.add(id, Some(timeout_duration)) {
            Some(rx) => rx,
            None if !self.pending.has_capacity() => {
                return Err(SprutError::capacity_exceeded("Too many pending calls"));
            }
            None => {
                return Err(SprutError::internal(format!("Correlation id {id} is already pending")));
            }
        };

        let started = Instant::now();
        match timeout(
            timeout_duration,
            self.cmd_tx.send(DataCommand::Request { id, payload }),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.pending.remove(&id);
                return Err(SprutError::not_connected("Connection task shut down"));
            }
            Err(_) => {
                self.pending.remove(&id);
                return Err(SprutError::timeout(timeout_duration, id.to_string()));
            }
        }

        let remaining = timeout_duration.saturating_sub(started.elapsed());
        match timeout(remaining, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(SprutError::internal("Pending call dropped without an answer")),
            Err(_) => {
                self.pending.remove(&id);
                Err(SprutError::timeout(timeout_duration, id.to_string()))
            }
        }
    }

    /// Wait until the socket is open.
    pub async fn connected(&self) -> SprutResult<ConnectionEpoch> {
        self.state.wait_open().await
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.state.link().is_open()
    }

    /// Current socket state.
    pub fn link_state(&self) -> LinkState {
        self.state.link()
    }

    /// Subscribe to lifecycle events and unsolicited frames.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Get the current number of pending calls.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Close the socket and stop reconnecting.
    ///
    /// Waits for the driver to acknowledge. Calling it again is a no-op.
    pub async fn close(&self) -> SprutResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .ctrl_tx
            .send(ControlCommand::Close { ack: Some(ack_tx) })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = ack_rx.await;
        Ok(())
    }
}

#[async_trait]
pub(crate) trait WsWriter: Send {
    async fn send_ws(&mut self, message: Message) -> SprutResult<()>;
}

#[async_trait]
impl<S> WsWriter for SplitSink<S, Message>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send,
{
    async fn send_ws(&mut self, message: Message) -> SprutResult<()> {
        self.send(message).await.map_err(SprutError::from)
    }
}

async fn connect_websocket(config: &WsConfig) -> SprutResult<HubSocket> {
    let (ws, _response) = timeout(config.connect_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| {
            SprutError::transport(format!(
                "Connect timed out after {:?}",
                config.connect_timeout
            ))
        })??;
    Ok(ws)
}

/// Why a connection task returned.
pub(crate) enum TaskExit {
    /// The client asked to close (or every handle was dropped).
    Shutdown(Option<oneshot::Sender<()>>),
    /// The socket went away; reconnect.
    Dropped(SprutError),
}

/// Background task owning the socket.
pub(crate) struct ConnectionDriver {
    config: Arc<WsConfig>,
    codec: JsonRpcCodec,
    pending: Arc<PendingCallRegistry>,
    state: Arc<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    metrics: SessionMetrics,
    epoch: ConnectionEpoch,
}

impl ConnectionDriver {
    async fn run(
        mut self,
        mut ctrl_rx: mpsc::Receiver<ControlCommand>,
        mut cmd_rx: mpsc::Receiver<DataCommand>,
    ) {
        info!(url = %self.config.url, "Starting hub connection driver");
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                self.metrics.record_reconnect();
                info!(url = %self.config.url, "Attempting to reconnect");
            }
            first_attempt = false;
            self.state.mark_connecting();

            let connect = tokio::select! {
                biased;
                ctrl = ctrl_rx.recv() => {
                    self.finish(close_ack(ctrl), "Client closed");
                    return;
                }
                result = connect_websocket(&self.config) => result,
            };

            match connect {
                Ok(ws) => {
                    let (ws_write, ws_read) = ws.split();
                    self.epoch.0 += 1;
                    self.state.mark_open(self.epoch);
                    info!(epoch = %self.epoch, "Hub connected");
                    let _ = self.events.send(SessionEvent::Connected { epoch: self.epoch });

                    let ws_read = ws_read.map(|result| result.map_err(SprutError::from));
                    match self
                        .connection_task(&mut ctrl_rx, &mut cmd_rx, ws_read, ws_write)
                        .await
                    {
                        TaskExit::Shutdown(ack) => {
                            self.finish(ack, "Client closed");
                            return;
                        }
                        TaskExit::Dropped(err) => {
                            let reason = err.to_string();
                            warn!(epoch = %self.epoch, error = %reason, "Hub connection closed, trying to reconnect");
                            self.on_disconnect(&reason);
                            let _ = self.events.send(SessionEvent::Disconnected {
                                epoch: self.epoch,
                                reason,
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Hub connection attempt failed");
                    self.on_disconnect(&err.to_string());
                }
            }

            let delay = self.config.reconnect_delay;
            debug!(delay_ms = delay.as_millis(), "Waiting before reconnect");
            if !self
                .wait_before_reconnect(delay, &mut ctrl_rx, &mut cmd_rx)
                .await
            {
                return;
            }
        }
    }

    /// Sleep out the reconnect delay, rejecting calls that arrive meanwhile.
    ///
    /// Returns `false` if the client shut down during the wait.
    async fn wait_before_reconnect(
        &self,
        delay: Duration,
        ctrl_rx: &mut mpsc::Receiver<ControlCommand>,
        cmd_rx: &mut mpsc::Receiver<DataCommand>,
    ) -> bool {
        let pause = sleep(delay);
        tokio::pin!(pause);

        loop {
            tokio::select! {
                biased;
                ctrl = ctrl_rx.recv() => {
                    self.finish(close_ack(ctrl), "Client closed");
                    return false;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(DataCommand::Request { id, .. }) => {
                        self.pending
                            .resolve(&id, Err(SprutError::not_connected("Reconnect pending")));
                    }
                    None => {
                        self.finish(None, "Client dropped");
                        return false;
                    }
                },
                _ = &mut pause => return true,
            }
        }
    }

    fn on_disconnect(&self, reason: &str) {
        self.state.mark_closed();
        let failed = self.pending.fail_all(reason);
        if failed > 0 {
            warn!(count = failed, "Rejected pending calls after disconnect");
        }
    }

    fn finish(&self, ack: Option<oneshot::Sender<()>>, reason: &str) {
        self.state.mark_shutdown();
        self.pending.fail_all(reason);
        info!(reason, "Hub connection driver stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    pub(crate) async fn connection_task<R, W>(
        &self,
        ctrl_rx: &mut mpsc::Receiver<ControlCommand>,
        cmd_rx: &mut mpsc::Receiver<DataCommand>,
        mut ws_read: R,
        mut ws_write: W,
    ) -> TaskExit
    where
        R: Stream<Item = SprutResult<Message>> + Unpin,
        W: WsWriter,
    {
        let ping_every = self.config.ping_interval;
        let mut ping_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);
        let mut sweep_interval = tokio::time::interval(self.config.pending_cleanup_interval);
        let mut ping_sent_at: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                ctrl = ctrl_rx.recv() => {
                    let _ = ws_write.send_ws(Message::Close(None)).await;
                    return TaskExit::Shutdown(close_ack(ctrl));
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(DataCommand::Request { id, payload }) => {
                            if !self.pending.contains(&id) {
                                debug!(id = %id, "Skipping request settled before it was written");
                                continue;
                            }
                            if let Err(err) = ws_write.send_ws(Message::text(payload)).await {
                                self.pending
                                    .resolve(&id, Err(SprutError::transport(err.to_string())));
                                return TaskExit::Dropped(err);
                            }
                            debug!(id = %id, "Request written");
                        }
                        None => {
                            let _ = ws_write.send_ws(Message::Close(None)).await;
                            return TaskExit::Shutdown(None);
                        }
                    }
                }
                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.dispatch(text),
                            Err(err) => warn!(error = %err, "Dropping non UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send_ws(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            ping_sent_at = None;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|frame| format!("closed by hub ({}): {}", frame.code, frame.reason))
                                .unwrap_or_else(|| "closed by hub".to_string());
                            return TaskExit::Dropped(SprutError::connection_lost(reason));
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "WebSocket read error");
                            return TaskExit::Dropped(err);
                        }
                        None => {
                            return TaskExit::Dropped(SprutError::connection_lost("socket closed"));
                        }
                    }
                }
                _ = ping_interval.tick() => {
                    if let Some(sent) = ping_sent_at
                        && sent.elapsed() >= self.config.pong_timeout
                    {
                        return TaskExit::Dropped(SprutError::connection_lost("Pong timeout"));
                    }
                    if let Err(err) = ws_write.send_ws(Message::Ping(Bytes::new())).await {
                        return TaskExit::Dropped(err);
                    }
                    ping_sent_at.get_or_insert_with(Instant::now);
                }
                _ = sweep_interval.tick() => {
                    let expired = self.pending.expire_stale();
                    if expired > 0 {
                        debug!(count = expired, "Expired stale pending calls");
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Dropping undecodable frame");
                return;
            }
        };

        match self.codec.classify(&frame) {
            MessageKind::Response => {
                if let Some(id) = frame.id() {
                    debug!(id = %id, "Received response");
                    self.pending.resolve(&id, Ok(frame));
                }
            }
            MessageKind::Event => {
                debug!(event = %text, "Received hub event");
                let _ = self.events.send(SessionEvent::Unsolicited(frame.into_value()));
            }
            MessageKind::Unknown => {
                debug!(message = %text, "Ignoring frame without correlation id");
            }
        }
    }
}

fn close_ack(ctrl: Option<ControlCommand>) -> Option<oneshot::Sender<()>> {
    match ctrl {
        Some(ControlCommand::Close { ack }) => ack,
        None => None,
    }
}
