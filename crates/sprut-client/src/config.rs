//! Session configuration: hub credentials plus transport tuning.

use std::{env, fmt, time::Duration};

use crate::{
    auth::Credentials,
    error::{SprutError, SprutResult},
    websocket::WsConfig,
};

pub const ENV_WS_URL: &str = "WS_URL";
pub const ENV_LOGIN: &str = "SPRUT_LOGIN";
pub const ENV_PASSWORD: &str = "SPRUT_PASSWORD";
pub const ENV_SERIAL: &str = "SPRUT_SERIAL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "SPRUT_REQUEST_TIMEOUT_MS";
pub const ENV_RECONNECT_DELAY_MS: &str = "SPRUT_RECONNECT_DELAY_MS";
pub const ENV_ALLOWED_COMMANDS: &str = "SPRUT_ALLOWED_COMMANDS";

/// Everything a [`SessionClient`](crate::SessionClient) needs to run.
#[derive(Clone)]
pub struct SessionConfig {
    /// Socket tuning. `ws.url` is the hub endpoint.
    pub ws: WsConfig,
    /// Account login.
    pub login: String,
    /// Account password. Never printed.
    pub password: String,
    /// Hub serial stamped on every envelope.
    pub serial: String,
    /// Command names `execute` accepts.
    pub allowed_commands: Vec<String>,
}

impl SessionConfig {
    /// Create a config with default transport tuning and the `update` allow-list.
    pub fn new(
        url: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            ws: WsConfig::new(url),
            login: login.into(),
            password: password.into(),
            serial: serial.into(),
            allowed_commands: vec!["update".to_string()],
        }
    }

    /// Read `WS_URL`, `SPRUT_LOGIN`, `SPRUT_PASSWORD` and `SPRUT_SERIAL`.
    ///
    /// Optional: `SPRUT_REQUEST_TIMEOUT_MS`, `SPRUT_RECONNECT_DELAY_MS`, and
    /// `SPRUT_ALLOWED_COMMANDS` (comma separated). The error names every
    /// missing required key.
    pub fn from_env() -> SprutResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SprutResult<Self> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let required = [ENV_WS_URL, ENV_LOGIN, ENV_PASSWORD, ENV_SERIAL];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| read(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(SprutError::config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let mut config = Self::new(
            read(ENV_WS_URL).unwrap_or_default(),
            read(ENV_LOGIN).unwrap_or_default(),
            read(ENV_PASSWORD).unwrap_or_default(),
            read(ENV_SERIAL).unwrap_or_default(),
        );

        if let Some(raw) = read(ENV_REQUEST_TIMEOUT_MS) {
            config.ws = config.ws.request_timeout(parse_millis(ENV_REQUEST_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = read(ENV_RECONNECT_DELAY_MS) {
            config.ws = config.ws.reconnect_delay(parse_millis(ENV_RECONNECT_DELAY_MS, &raw)?);
        }
        if let Some(raw) = read(ENV_ALLOWED_COMMANDS) {
            config.allowed_commands = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Replace the transport tuning, keeping the URL.
    #[must_use]
    pub fn ws_config(mut self, ws: WsConfig) -> Self {
        let url = std::mem::take(&mut self.ws.url);
        self.ws = ws;
        if self.ws.url.is_empty() {
            self.ws.url = url;
        }
        self
    }

    /// Set the per-call deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.ws = self.ws.request_timeout(timeout);
        self
    }

    /// Set the fixed delay between reconnect attempts.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.ws = self.ws.reconnect_delay(delay);
        self
    }

    /// Replace the `execute` allow-list.
    #[must_use]
    pub fn allowed_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Login and password for the auth handshake.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.login.clone(), self.password.clone())
    }

    /// Check required fields and the transport tuning.
    pub fn validate(&self) -> SprutResult<()> {
        let mut missing = Vec::new();
        if self.ws.url.trim().is_empty() {
            missing.push("url");
        }
        if self.login.trim().is_empty() {
            missing.push("login");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.serial.trim().is_empty() {
            missing.push("serial");
        }
        if !missing.is_empty() {
            return Err(SprutError::config(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )));
        }
        self.ws.validate().map_err(SprutError::config)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("ws", &self.ws)
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("serial", &self.serial)
            .field("allowed_commands", &self.allowed_commands)
            .finish()
    }
}

fn parse_millis(key: &str, raw: &str) -> SprutResult<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| SprutError::config(format!("{key} must be a number of milliseconds: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_WS_URL, "ws://192.168.1.10/spruthub"),
            (ENV_LOGIN, "user@example.com"),
            (ENV_PASSWORD, "secret"),
            (ENV_SERIAL, "ABC123"),
        ]
    }

    #[test]
    fn reads_required_values_with_defaults() {
        let config = SessionConfig::from_lookup(lookup(&required())).expect("config");
        assert_eq!(config.ws.url, "ws://192.168.1.10/spruthub");
        assert_eq!(config.serial, "ABC123");
        assert_eq!(config.allowed_commands, vec!["update".to_string()]);
        assert_eq!(config.ws.request_timeout, Duration::from_secs(30));
        assert_eq!(config.ws.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn names_every_missing_key() {
        let err = SessionConfig::from_lookup(lookup(&[(ENV_WS_URL, "ws://hub"), (ENV_LOGIN, " ")]))
            .unwrap_err();
        let SprutError::Config { message } = err else {
            panic!("expected config error");
        };
        assert!(message.contains(ENV_LOGIN));
        assert!(message.contains(ENV_PASSWORD));
        assert!(message.contains(ENV_SERIAL));
        assert!(!message.contains(ENV_WS_URL));
    }

    #[test]
    fn reads_optional_overrides() {
        let mut pairs = required();
        pairs.push((ENV_REQUEST_TIMEOUT_MS, "1500"));
        pairs.push((ENV_RECONNECT_DELAY_MS, "250"));
        pairs.push((ENV_ALLOWED_COMMANDS, "update, reboot ,"));
        let config = SessionConfig::from_lookup(lookup(&pairs)).expect("config");

        assert_eq!(config.ws.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.ws.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.allowed_commands, vec!["update", "reboot"]);
    }

    #[test]
    fn rejects_bad_numbers_and_schemes() {
        let mut pairs = required();
        pairs.push((ENV_REQUEST_TIMEOUT_MS, "soon"));
        assert!(matches!(
            SessionConfig::from_lookup(lookup(&pairs)),
            Err(SprutError::Config { .. })
        ));

        let config = SessionConfig::new("http://hub", "me", "pw", "serial");
        assert!(matches!(config.validate(), Err(SprutError::Config { .. })));
    }

    #[test]
    fn debug_redacts_password() {
        let config = SessionConfig::new("ws://hub", "me", "hunter2", "serial");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
