//! User-facing hub client.
//!
//! [`SessionClient`] multiplexes concurrent calls over the single hub socket,
//! logs in lazily, and transparently re-authenticates once when the hub
//! rejects the session token.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::{
    auth::{AuthSession, RpcTransport},
    command::{Command, CommandArgs, CommandOutcome, MethodName, MethodResponse},
    config::SessionConfig,
    error::{SprutError, SprutResult},
    metrics::SessionMetrics,
    websocket::{
        ConnectionEpoch, CorrelationIds, InboundFrame, JsonRpcCodec, LinkState, SessionEvent,
        SessionState, TransportConnection,
    },
};

/// Default `expand` for `accessory.list`.
pub const DEFAULT_ACCESSORY_EXPAND: &str = "services,characteristics";

/// Default `expand` for `scenario.get`.
pub const DEFAULT_SCENARIO_EXPAND: &str = "data";

/// Client for one Sprut.hub.
///
/// Cheap to clone; every clone shares the same socket, token, and pending
/// calls. The connection closes when [`SessionClient::close`] is called or
/// the last clone is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use sprut_client::{CommandArgs, SessionClient, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = SessionConfig::new("ws://192.168.1.10/spruthub", "me@example.com", "secret", "SERIAL");
///     let client = SessionClient::new(config)?;
///     client.connected().await?;
///
///     let outcome = client
///         .execute("update", &CommandArgs::new(167, 13, 15, true))
///         .await?;
///     println!("{outcome:?}");
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connection: TransportConnection,
    codec: JsonRpcCodec,
    ids: CorrelationIds,
    state: Arc<SessionState>,
    auth: Mutex<AuthSession>,
    allowed_commands: Vec<String>,
    metrics: SessionMetrics,
}

impl SessionClient {
    /// Validate the configuration and start connecting in the background.
    ///
    /// Must be called from within a Tokio runtime. Use
    /// [`SessionClient::connected`] to wait for the socket.
    pub fn new(config: SessionConfig) -> SprutResult<Self> {
        config.validate()?;

        let state = Arc::new(SessionState::new());
        let codec = JsonRpcCodec::new(config.serial.clone());
        let metrics = SessionMetrics::new();
        let credentials = config.credentials();
        let connection = TransportConnection::spawn(
            config.ws,
            codec.clone(),
            Arc::clone(&state),
            metrics.clone(),
        )?;

        info!(serial = %config.serial, "Hub session client created");

        Ok(Self {
            inner: Arc::new(SessionInner {
                connection,
                codec,
                ids: CorrelationIds::new(),
                state,
                auth: Mutex::new(AuthSession::new(credentials)),
                allowed_commands: config.allowed_commands,
                metrics,
            }),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Wait until the socket is open. Resolves immediately if it already is.
    pub async fn connected(&self) -> SprutResult<ConnectionEpoch> {
        self.inner.connection.connected().await
    }

    /// Whether a socket is open right now.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Current link state of the underlying socket.
    pub fn state(&self) -> LinkState {
        self.inner.connection.link_state()
    }

    /// Subscribe to connect/disconnect notifications and unsolicited frames.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.connection.events()
    }

    /// Number of calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.connection.pending_count()
    }

    /// Call, re-authentication, reconnect and timeout counters.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.inner.metrics
    }

    /// Close the socket for good.
    ///
    /// Pending calls fail with `ConnectionLost`; later calls fail with
    /// `NotConnected`.
    pub async fn close(&self) -> SprutResult<()> {
        self.inner.connection.close().await
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Send `params` and return the raw envelope the hub answered with.
    ///
    /// If the hub rejects the token (`-666003`), logs in again and re-sends
    /// the call exactly once. The retried answer is returned as is.
    pub async fn call(&self, params: Value) -> SprutResult<InboundFrame> {
        self.inner.call(params).await
    }

    /// Run the login sequence now and store the new token.
    pub async fn authenticate(&self) -> SprutResult<String> {
        let mut auth = self.inner.auth.lock().await;
        self.inner.state.clear_token();
        let token = auth.authenticate(self.inner.as_ref()).await?;
        self.inner.state.set_token(token.clone());
        self.inner.metrics.record_reauthentication();
        Ok(token)
    }

    /// Run an allow-listed command.
    ///
    /// Validation failures are returned before anything is sent. RPC-level
    /// errors come back as an unsuccessful [`CommandOutcome`].
    pub async fn execute(&self, command: &str, args: &CommandArgs) -> SprutResult<CommandOutcome> {
        let params = match Command::resolve(command, &self.inner.allowed_commands)? {
            Command::Update => args.validate()?.to_params(),
        };

        if !self.is_connected() {
            return Err(SprutError::not_connected("Not connected"));
        }
        self.inner.ensure_token().await?;

        let frame = self.inner.call(params).await?;
        let outcome = CommandOutcome::from_frame(&frame)?;
        if outcome.is_success {
            info!(command, "Command executed successfully");
        } else {
            warn!(command, code = outcome.code, message = %outcome.message, "Command rejected by hub");
        }
        Ok(outcome)
    }

    /// Call a dotted hub method such as `hub.list`.
    ///
    /// `params` is nested as `{hub: {list: params}}`; the answer's `data` is
    /// `result.hub.list`.
    pub async fn call_method(&self, method: &str, params: Value) -> SprutResult<MethodResponse> {
        let method_name = MethodName::parse(method)?;
        self.inner.ensure_token().await?;

        let frame = self.inner.call(method_name.to_params(params)).await?;
        let response = MethodResponse::from_frame(&method_name, &frame)?;
        debug!(method, success = response.is_success, "Method call returned");
        Ok(response)
    }

    /// `server.version`
    pub async fn version(&self) -> SprutResult<MethodResponse> {
        self.call_method("server.version", json!({})).await
    }

    /// `hub.list`
    pub async fn list_hubs(&self) -> SprutResult<MethodResponse> {
        self.call_method("hub.list", json!({})).await
    }

    /// `accessory.list`, expanding services and characteristics by default.
    pub async fn list_accessories(&self, expand: Option<&str>) -> SprutResult<MethodResponse> {
        let expand = expand.unwrap_or(DEFAULT_ACCESSORY_EXPAND);
        self.call_method("accessory.list", json!({ "expand": expand }))
            .await
    }

    /// `room.list`
    pub async fn list_rooms(&self) -> SprutResult<MethodResponse> {
        self.call_method("room.list", json!({})).await
    }

    /// `scenario.get`, expanding `data` by default.
    pub async fn get_scenario(
        &self,
        id: &str,
        expand: Option<&str>,
    ) -> SprutResult<MethodResponse> {
        let expand = expand.unwrap_or(DEFAULT_SCENARIO_EXPAND);
        self.call_method("scenario.get", json!({ "id": id, "expand": expand }))
            .await
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl SessionInner {
    async fn call(&self, params: Value) -> SprutResult<InboundFrame> {
        let sent = self.state.token();
        let frame = self.send(params.clone(), sent.as_deref()).await?;
        if !frame.is_invalid_token() {
            return Ok(frame);
        }

        warn!(id = ?frame.id(), "Hub rejected session token, re-authenticating");
        let fresh = self.refresh_token(sent.as_deref()).await?;
        self.send(params, Some(&fresh)).await
    }

    /// One round trip with the current token. Never retries.
    async fn call_once(&self, params: Value) -> SprutResult<InboundFrame> {
        let token = self.state.token();
        self.send(params, token.as_deref()).await
    }

    /// One round trip carrying exactly `token`.
    async fn send(&self, params: Value, token: Option<&str>) -> SprutResult<InboundFrame> {
        let id = self.ids.next_id();
        let payload = self.codec.encode_request(id, &params, token)?;

        self.metrics.record_call(&method_label(&params));
        let started = Instant::now();
        let result = self.connection.request(id, payload, None).await;
        match &result {
            Ok(_) => self.metrics.record_latency(started.elapsed()),
            Err(SprutError::Timeout { .. }) => {
                self.metrics.record_timeout();
                warn!(id = %id, "Call timed out");
            }
            Err(err) => debug!(id = %id, error = %err, "Call failed"),
        }
        result
    }

    async fn ensure_token(&self) -> SprutResult<String> {
        match self.state.token() {
            Some(token) => Ok(token),
            None => self.refresh_token(None).await,
        }
    }

    /// Single-flight login.
    ///
    /// Callers queue on the auth lock. Whoever gets it second finds a token
    /// different from the one that was rejected and reuses it.
    async fn refresh_token(&self, rejected: Option<&str>) -> SprutResult<String> {
        let mut auth = self.auth.lock().await;
        if let Some(current) = self.state.token()
            && rejected != Some(current.as_str())
        {
            debug!("Token already refreshed by a concurrent call");
            return Ok(current);
        }

        self.state.clear_token();
        auth.invalidate();
        let token = auth.authenticate(self).await?;
        self.state.set_token(token.clone());
        self.metrics.record_reauthentication();
        Ok(token)
    }
}

#[async_trait]
impl RpcTransport for SessionInner {
    async fn call_raw(&self, params: Value) -> SprutResult<InboundFrame> {
        self.call_once(params).await
    }
}

/// `{"hub": {"list": {}}}` becomes `hub.list`.
fn method_label(params: &Value) -> String {
    let Some((namespace, body)) = params.as_object().and_then(|map| map.iter().next()) else {
        return "unknown".to_string();
    };
    match body.as_object().and_then(|map| map.keys().next()) {
        Some(action) => format!("{namespace}.{action}"),
        None => namespace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn method_label_reads_nested_keys() {
        assert_eq!(method_label(&json!({"hub": {"list": {}}})), "hub.list");
        assert_eq!(method_label(&json!({"account": "x"})), "account");
        assert_eq!(method_label(&json!([])), "unknown");
    }

    #[tokio::test]
    async fn rejects_invalid_config_before_spawning() {
        let config = SessionConfig::new("ws://hub.local", "", "pw", "serial");
        assert!(matches!(
            SessionClient::new(config),
            Err(SprutError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn not_allowed_command_fails_without_connection() {
        let config = SessionConfig::new("ws://127.0.0.1:9", "me", "pw", "serial")
            .reconnect_delay(Duration::from_secs(60));
        let client = SessionClient::new(config).expect("client");

        let err = client
            .execute("delete", &CommandArgs::new(1, 2, 3, true))
            .await
            .unwrap_err();
        assert!(matches!(err, SprutError::CommandNotAllowed { .. }));

        let err = client
            .execute("update", &CommandArgs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SprutError::InvalidArguments { .. }));

        client.close().await.expect("close");
    }

    #[tokio::test]
    async fn calls_fail_fast_after_close() {
        let config = SessionConfig::new("ws://127.0.0.1:9", "me", "pw", "serial")
            .reconnect_delay(Duration::from_secs(60));
        let client = SessionClient::new(config).expect("client");
        client.close().await.expect("close");

        assert_eq!(client.state(), LinkState::Closed);
        assert!(matches!(
            client.call(json!({"server": {"version": {}}})).await,
            Err(SprutError::NotConnected { .. })
        ));
        assert!(matches!(
            client.connected().await,
            Err(SprutError::NotConnected { .. })
        ));
    }
}
