//! Webhook Dispatch Module
//!
//! Event bus subscriber that POSTs every domain event to the configured
//! webhook URLs. Each delivery carries an HMAC-SHA256 signature header so
//! receivers can authenticate the payload:
//!
//! `X-Signature: t=<unix>,v1=<hex HMAC-SHA256 over "<t>.<raw-body>">`
//!
//! Delivery is fire-and-forget; retry and backoff are the receiver's
//! concern, not this service's.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WebhookConfig;
use crate::events::{Event, Subscription};
use crate::registry::{current_timestamp, Session, SessionRegistry, Transfer};

type HmacSha256 = Hmac<Sha256>;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Signature";

// ============================================================================
// PAYLOAD CONTRACT
// ============================================================================

/// Webhook payload envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Unique delivery id.
    pub id: String,
    /// Dotted event type, e.g. `session.completed`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Emission time (Unix seconds).
    pub created_at: u64,
    pub data: WebhookData,
}

/// Event payload: the session and/or transfer the event concerns.
#[derive(Debug, Default, Serialize)]
pub struct WebhookData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<Transfer>,
}

/// Computes the signature header value for a payload body.
///
/// The signed string is `"<t>.<raw-body>"`; the header value is
/// `t=<t>,v1=<hex digest>`.
pub fn sign_payload(secret: &str, timestamp: u64, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Fans registry events out to the configured webhook URLs.
pub struct WebhookDispatcher {
    config: WebhookConfig,
    registry: Arc<SessionRegistry>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig, registry: Arc<SessionRegistry>) -> Self {
        for url in &config.urls {
            if !url.starts_with("https://") {
                warn!(
                    "webhook URL {} does not use HTTPS, payloads travel in cleartext",
                    url
                );
            }
        }
        Self {
            config,
            registry,
            client: reqwest::Client::new(),
        }
    }

    /// Consumes events until the bus closes.
    pub fn start(self, mut subscription: Subscription) -> JoinHandle<()> {
        info!(
            "webhook dispatcher started for {} endpoints",
            self.config.urls.len()
        );
        tokio::spawn(async move {
            while let Some(event) = subscription.rx.recv().await {
                self.dispatch(event).await;
            }
            debug!("webhook dispatcher stopped, bus closed");
        })
    }

    /// Builds, signs and fires one delivery to every endpoint.
    async fn dispatch(&self, event: Event) {
        let payload = WebhookEvent {
            id: uuid::Uuid::new_v4().to_string(),
            kind: event.kind().to_string(),
            created_at: current_timestamp(),
            data: self.build_data(&event).await,
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to serialize webhook payload: {}", e);
                return;
            }
        };
        let signature = sign_payload(&self.config.secret, payload.created_at, &body);

        for url in &self.config.urls {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();
            let signature = signature.clone();
            tokio::spawn(async move {
                let result = client
                    .post(&url)
                    .header("content-type", "application/json")
                    .header(SIGNATURE_HEADER, &signature)
                    .timeout(std::time::Duration::from_secs(5))
                    .body(body)
                    .send()
                    .await;
                match result {
                    Ok(resp) => debug!("webhook delivered to {} ({})", url, resp.status()),
                    Err(e) => warn!("webhook delivery to {} failed: {}", url, e),
                }
            });
        }
    }

    /// Resolves the session and/or transfer an event refers to, loading
    /// referenced records from the registry when the event only carries ids.
    async fn build_data(&self, event: &Event) -> WebhookData {
        match event {
            Event::SessionCreated { session } | Event::SessionRecreated { session, .. } => {
                WebhookData {
                    session: Some(session.clone()),
                    transfer: None,
                }
            }
            Event::SessionExpired { session_id } => WebhookData {
                session: self.registry.get_session(session_id).await.ok(),
                transfer: None,
            },
            Event::SessionCompleted {
                session_id,
                transfer_id,
            } => WebhookData {
                session: self.registry.get_session(session_id).await.ok(),
                transfer: self.registry.get_transfer(transfer_id).await.ok(),
            },
            Event::TransferDetected {
                transfer,
                session_id,
                ..
            } => {
                let session = match session_id {
                    Some(id) => self.registry.get_session(id).await.ok(),
                    None => None,
                };
                WebhookData {
                    session,
                    transfer: Some(transfer.clone()),
                }
            }
            Event::TransferUpdated { transfer_id, .. } => WebhookData {
                session: None,
                transfer: self.registry.get_transfer(transfer_id).await.ok(),
            },
            Event::TransferConfirmed {
                transfer_id,
                session_id,
            } => {
                let session = match session_id {
                    Some(id) => self.registry.get_session(id).await.ok(),
                    None => None,
                };
                WebhookData {
                    session,
                    transfer: self.registry.get_transfer(transfer_id).await.ok(),
                }
            }
            Event::ChainHalted { .. } => WebhookData::default(),
        }
    }
}
