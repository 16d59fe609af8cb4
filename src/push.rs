//! Push gateway client
//!
//! Messages are submitted in batches; the gateway answers with one ticket per
//! message, in request order, or fails the whole batch.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::composer::Notification;

pub const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

static PUSH_TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^ExponentPushToken\[.+\]$",
        r"^ExpoPushToken\[.+\]$",
        r"(?i)^[a-z\d]{8}-[a-z\d]{4}-[a-z\d]{4}-[a-z\d]{4}-[a-z\d]{12}$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Whether `token` looks like an address the push service accepts.
pub fn is_push_token(token: &str) -> bool {
    PUSH_TOKEN_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(token))
}

/// One message in the gateway's wire format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub priority: String,
}

impl PushMessage {
    pub fn new(to: impl Into<String>, notification: &Notification) -> Self {
        Self {
            to: to.into(),
            sound: "default".to_string(),
            title: notification.title.clone(),
            body: notification.body.clone(),
            data: notification.data.clone(),
            priority: "high".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TicketDetails {
    #[serde(default)]
    pub error: Option<String>,
}

/// The gateway's receipt for one message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushTicket {
    Ok {
        id: String,
    },
    Error {
        message: String,
        #[serde(default)]
        details: Option<TicketDetails>,
    },
}

impl PushTicket {
    /// Human readable rejection reason, `None` for accepted messages.
    pub fn rejection(&self) -> Option<String> {
        match self {
            PushTicket::Ok { .. } => None,
            PushTicket::Error { message, details } => {
                match details.as_ref().and_then(|d| d.error.as_deref()) {
                    Some(code) => Some(format!("{code}: {message}")),
                    None => Some(message.clone()),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: Vec<PushTicket>,
}

/// Errors that fail a whole batch
#[derive(Debug)]
pub enum GatewayError {
    /// The request could not be sent or the response not read
    Transport(String),

    /// Non-success HTTP status
    Status { status: u16, body: String },

    /// The response body is not a ticket list
    MalformedResponse(String),

    /// The gateway answered with a different number of tickets than messages
    TicketCountMismatch { expected: usize, received: usize },

    /// No answer within the batch timeout
    Timeout(Duration),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "push request failed: {}", msg),
            GatewayError::Status { status, body } => {
                write!(f, "push gateway returned status {}: {}", status, body)
            }
            GatewayError::MalformedResponse(msg) => {
                write!(f, "malformed push gateway response: {}", msg)
            }
            GatewayError::TicketCountMismatch { expected, received } => write!(
                f,
                "push gateway returned {} tickets for {} messages",
                received, expected
            ),
            GatewayError::Timeout(after) => {
                write!(f, "push gateway did not answer within {:?}", after)
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Accepts batches of push messages
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Submit one batch. Tickets are returned in message order.
    async fn submit_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError>;
}

/// Expo push service client
#[derive(Debug, Clone)]
pub struct ExpoGateway {
    client: Client,
    url: String,
    access_token: Option<String>,
}

impl ExpoGateway {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            access_token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for ExpoGateway {
    fn default() -> Self {
        Self::new(EXPO_PUSH_URL, None)
    }
}

#[async_trait]
impl PushGateway for ExpoGateway {
    #[instrument(skip_all, fields(messages = messages.len()))]
    async fn submit_batch(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, GatewayError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(messages);

        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("push gateway returned {status}: {body}");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: PushResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        debug!("push gateway accepted batch, {} tickets", parsed.data.len());
        Ok(parsed.data)
    }
}
