//! Two-step login against the hub.
//!
//! ```text
//! Unauthenticated ──account.login──▶ AwaitingPasswordChallenge ──account.answer──▶ Authenticated
//! ```
//!
//! Any unexpected answer aborts the sequence and resets to `Unauthenticated`.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    error::{SprutError, SprutResult},
    websocket::InboundFrame,
};

/// Question type the hub must ask after `account.login`.
pub const QUESTION_TYPE_PASSWORD: &str = "QUESTION_TYPE_PASSWORD";

/// Status the hub reports for an accepted password.
pub const ACCOUNT_RESPONSE_SUCCESS: &str = "ACCOUNT_RESPONSE_SUCCESS";

const AUTHENTICATION_FAILED: &str = "Authentication failed";

/// Sends one raw call and returns the envelope the hub answered with.
///
/// Implementations must not retry on token rejection; the login sequence
/// runs before any token exists.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call_raw(&self, params: Value) -> SprutResult<InboundFrame>;
}

/// Hub account credentials.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    /// Create credentials for the two-step login.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Where the login sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingPasswordChallenge,
    Authenticated,
}

/// Runs the `account.login` / `account.answer` handshake.
#[derive(Debug)]
pub struct AuthSession {
    credentials: Credentials,
    state: AuthState,
}

impl AuthSession {
    /// Create a session in the `Unauthenticated` state.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: AuthState::Unauthenticated,
        }
    }

    /// Current login state.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Mark the held token as rejected so the next login starts over.
    pub fn invalidate(&mut self) {
        self.state = AuthState::Unauthenticated;
    }

    /// Log in and return the session token.
    ///
    /// Exactly two round trips. No retries at this layer.
    pub async fn authenticate<T>(&mut self, transport: &T) -> SprutResult<String>
    where
        T: RpcTransport + ?Sized,
    {
        self.state = AuthState::Unauthenticated;
        let result = self.run(transport).await;
        match &result {
            Ok(_) => {
                self.state = AuthState::Authenticated;
                info!(login = %self.credentials.login, "Authenticated with hub");
            }
            Err(err) => {
                self.state = AuthState::Unauthenticated;
                warn!(login = %self.credentials.login, error = %err, "Hub authentication failed");
            }
        }
        result
    }

    async fn run<T>(&mut self, transport: &T) -> SprutResult<String>
    where
        T: RpcTransport + ?Sized,
    {
        let login = transport
            .call_raw(json!({"account": {"login": {"login": self.credentials.login}}}))
            .await?;
        let question = login
            .result_at(&["account", "login", "question", "type"])
            .and_then(Value::as_str);
        if question != Some(QUESTION_TYPE_PASSWORD) {
            debug!(question = ?question, "Unexpected login question");
            return Err(SprutError::protocol("Expected password question type"));
        }
        self.state = AuthState::AwaitingPasswordChallenge;

        let answer = transport
            .call_raw(json!({"account": {"answer": {"data": self.credentials.password}}}))
            .await?;
        let status = answer
            .result_at(&["account", "answer", "status"])
            .and_then(Value::as_str);
        if status != Some(ACCOUNT_RESPONSE_SUCCESS) {
            let detail = answer
                .error()
                .map(|error| error.message)
                .filter(|message| !message.is_empty());
            return Err(match detail {
                Some(detail) => {
                    SprutError::authentication_failed_with_detail(AUTHENTICATION_FAILED, detail)
                }
                None => SprutError::authentication_failed(AUTHENTICATION_FAILED),
            });
        }

        answer
            .result_at(&["account", "answer", "token"])
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SprutError::protocol("Authentication succeeded without a token"))
    }
}
