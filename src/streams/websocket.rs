//! `logsSubscribe` over the Solana PubSub WebSocket.
//!
//! Each subscription owns its own connection, so one program's reconnects
//! never disturb another's stream.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use tokio::net::TcpStream;
use tokio::time::Duration;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::{LogNotification, LogSubscription, LogsSubscriber};
use crate::config::CommitmentLevel;
use crate::utils::error::{IngestorError, Result};
use crate::utils::logging::redact_url;

const SUBSCRIBE_REQUEST_ID: u64 = 1;
const UNSUBSCRIBE_REQUEST_ID: u64 = 2;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket notification from Solana (logsSubscribe)
#[derive(Debug, Deserialize)]
struct LogsNotification {
    method: String,
    params: LogsNotificationParams,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationParams {
    result: LogsNotificationResult,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationResult {
    value: LogsNotificationValue,
    context: LogsNotificationContext,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct LogsNotificationValue {
    signature: String,
    err: Option<serde_json::Value>,
}

/// Reply to a subscribe request.
#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: Option<u64>,
    result: Option<u64>,
    error: Option<serde_json::Value>,
}

/// Builds the `logsSubscribe` request for one program.
#[must_use]
pub fn subscribe_request(program: &Pubkey, commitment: CommitmentLevel) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "logsSubscribe",
        "params": [
            { "mentions": [program.to_string()] },
            { "commitment": commitment.as_str() }
        ]
    })
}

#[must_use]
pub fn unsubscribe_request(subscription_id: u64) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": UNSUBSCRIBE_REQUEST_ID,
        "method": "logsUnsubscribe",
        "params": [subscription_id]
    })
}

/// Parses a text frame into a notification.
///
/// Returns `None` for frames that are not log notifications, and for
/// notifications carrying an unparsable signature.
fn parse_notification(text: &str) -> Option<LogNotification> {
    let notification: LogsNotification = serde_json::from_str(text).ok()?;
    if notification.method != "logsNotification" {
        return None;
    }
    let result = notification.params.result;
    match Signature::from_str(&result.value.signature) {
        Ok(signature) => Some(LogNotification {
            signature,
            slot: result.context.slot,
            err: result.value.err,
        }),
        Err(e) => {
            tracing::warn!(
                signature = %result.value.signature,
                error = %e,
                "Ignoring notification with invalid signature"
            );
            None
        }
    }
}

/// Opens `logsSubscribe` streams against a PubSub endpoint.
///
/// # Example
///
/// ```no_run
/// use solana_event_ingestor::streams::LogsSubscriber;
/// use solana_event_ingestor::streams::websocket::WebSocketSubscriber;
/// use solana_sdk::pubkey::Pubkey;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let subscriber = WebSocketSubscriber::new("ws://127.0.0.1:8900");
/// let mut subscription = subscriber.subscribe(&Pubkey::new_unique()).await?;
/// while let Some(notification) = subscription.next().await? {
///     println!("{} @ {}", notification.signature, notification.slot);
/// }
/// # Ok(())
/// # }
/// ```
pub struct WebSocketSubscriber {
    ws_url: String,
    commitment: CommitmentLevel,
    confirm_timeout: Duration,
}

impl WebSocketSubscriber {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            commitment: CommitmentLevel::Confirmed,
            confirm_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_commitment(mut self, commitment: CommitmentLevel) -> Self {
        self.commitment = commitment;
        self
    }

    /// How long to wait for the provider to confirm a subscription.
    #[must_use]
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    async fn await_confirmation(stream: &mut WsStream) -> Result<u64> {
        while let Some(message) = stream.next().await {
            let message = message.map_err(|e| {
                IngestorError::ConnectionError(format!("WebSocket receive failed: {e}"))
            })?;
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(response) = serde_json::from_str::<SubscriptionResponse>(&text) else {
                continue;
            };
            if response.id != Some(SUBSCRIBE_REQUEST_ID) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(IngestorError::ConnectionError(format!(
                    "Subscription rejected: {error}"
                )));
            }
            if let Some(subscription_id) = response.result {
                return Ok(subscription_id);
            }
        }
        Err(IngestorError::ConnectionError(
            "WebSocket closed before subscription was confirmed".to_string(),
        ))
    }
}

#[async_trait]
impl LogsSubscriber for WebSocketSubscriber {
    async fn subscribe(&self, program: &Pubkey) -> Result<Box<dyn LogSubscription>> {
        tracing::debug!(
            url = %redact_url(&self.ws_url),
            program_id = %program,
            "Connecting to WebSocket"
        );

        let (mut stream, _) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            IngestorError::ConnectionError(format!("WebSocket connection failed: {e}"))
        })?;

        stream
            .send(Message::Text(
                subscribe_request(program, self.commitment).to_string(),
            ))
            .await
            .map_err(|e| {
                IngestorError::ConnectionError(format!("Failed to send subscription: {e}"))
            })?;

        let subscription_id =
            tokio::time::timeout(self.confirm_timeout, Self::await_confirmation(&mut stream))
                .await
                .map_err(|_| {
                    IngestorError::ConnectionError(
                        "Timed out waiting for subscription confirmation".to_string(),
                    )
                })??;

        tracing::info!(program_id = %program, subscription_id, "Logs subscription active");

        Ok(Box::new(WebSocketSubscription {
            stream,
            subscription_id,
            program: *program,
        }))
    }
}

struct WebSocketSubscription {
    stream: WsStream,
    subscription_id: u64,
    program: Pubkey,
}

#[async_trait]
impl LogSubscription for WebSocketSubscription {
    async fn next(&mut self) -> Result<Option<LogNotification>> {
        while let Some(message) = self.stream.next().await {
            let message = message.map_err(|e| {
                IngestorError::ConnectionError(format!("WebSocket receive failed: {e}"))
            })?;
            match message {
                Message::Text(text) => {
                    if let Some(notification) = parse_notification(&text) {
                        return Ok(Some(notification));
                    }
                }
                Message::Close(frame) => {
                    tracing::warn!(program_id = %self.program, ?frame, "WebSocket closed by server");
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.stream
            .send(Message::Text(
                unsubscribe_request(self.subscription_id).to_string(),
            ))
            .await
            .map_err(|e| IngestorError::ConnectionError(format!("Failed to unsubscribe: {e}")))?;
        self.stream
            .close(None)
            .await
            .map_err(|e| IngestorError::ConnectionError(format!("Failed to close WebSocket: {e}")))?;
        tracing::debug!(program_id = %self.program, subscription_id = self.subscription_id, "Unsubscribed");
        Ok(())
    }
}
