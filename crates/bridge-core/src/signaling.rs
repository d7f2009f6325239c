//! Client signaling messages
//!
//! Requests and events are JSON objects discriminated by a `type` field.
//! Every request gets exactly one response carrying either `data` or
//! `error`; events are pushed to the client independently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::candidates::IceCandidate;
use crate::errors::{BridgeError, Result};
use crate::manager::BridgeManager;

/// Outbound channel to one client
pub type EventSink = mpsc::UnboundedSender<ServerEvent>;

/// Events pushed to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    /// The bridge is up and egress, if configured, has been started
    CastReady,
    /// Local candidate to hand to the browser
    IceCandidate { candidate: IceCandidate },
    /// Mirrored diagnostic line
    Log { text: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BridgeError::signaling(e.to_string()))
    }
}

/// Inbound client requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    StartPresenter { sdp_offer: String },
    StartCast { enable_encryption: bool },
    IceCandidate { candidate: IceCandidate },
    Debug,
    /// Logged and answered with empty data
    Unknown(String),
}

#[derive(Deserialize)]
struct StartPresenterBody {
    #[serde(rename = "sdpOffer")]
    sdp_offer: String,
}

#[derive(Deserialize)]
struct StartCastBody {
    #[serde(default, rename = "enableEncryption", alias = "enableSrtp")]
    enable_encryption: bool,
}

/// Browsers send the `RTCIceCandidate` object; bare strings are accepted too
#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateField {
    Full(IceCandidate),
    Line(String),
}

#[derive(Deserialize)]
struct IceCandidateBody {
    candidate: CandidateField,
}

impl ClientRequest {
    /// Decode a request, reading the `type` discriminator first
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| BridgeError::signaling(format!("invalid JSON: {}", e)))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::signaling("message has no type"))?
            .to_string();

        let request = match kind.as_str() {
            "START_PRESENTER" => {
                let body: StartPresenterBody = decode(&kind, value)?;
                ClientRequest::StartPresenter {
                    sdp_offer: body.sdp_offer,
                }
            }
            "START_CAST" => {
                let body: StartCastBody = decode(&kind, value)?;
                ClientRequest::StartCast {
                    enable_encryption: body.enable_encryption,
                }
            }
            "ICE_CANDIDATE" => {
                let body: IceCandidateBody = decode(&kind, value)?;
                let candidate = match body.candidate {
                    CandidateField::Full(candidate) => candidate,
                    CandidateField::Line(line) => IceCandidate::new(line),
                };
                ClientRequest::IceCandidate { candidate }
            }
            "DEBUG" => ClientRequest::Debug,
            _ => ClientRequest::Unknown(kind),
        };
        Ok(request)
    }

    pub fn message_type(&self) -> &str {
        match self {
            ClientRequest::StartPresenter { .. } => "START_PRESENTER",
            ClientRequest::StartCast { .. } => "START_CAST",
            ClientRequest::IceCandidate { .. } => "ICE_CANDIDATE",
            ClientRequest::Debug => "DEBUG",
            ClientRequest::Unknown(kind) => kind,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(kind: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| BridgeError::signaling(format!("malformed {}: {}", kind, e)))
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Data(Value),
    Error(String),
}

impl Response {
    pub fn data(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            outcome: Outcome::Data(data),
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            outcome: Outcome::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"{}","error":"unserializable response: {}"}}"#, self.kind, e)
        })
    }
}

/// Binds the message codec to a [`BridgeManager`]. One call of
/// [`on_connect`](Self::on_connect) per client connection, then
/// [`handle_text`](Self::handle_text) per message, then
/// [`on_disconnect`](Self::on_disconnect).
#[derive(Clone)]
pub struct SignalingHandler {
    manager: Arc<BridgeManager>,
}

impl SignalingHandler {
    pub fn new(manager: Arc<BridgeManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<BridgeManager> {
        &self.manager
    }

    /// Register a session for a new client; events go to `sink`
    pub fn on_connect(&self, client_id: Option<String>, sink: EventSink) -> Result<String> {
        self.manager.open_session(client_id, Some(sink))
    }

    /// Handle one text frame, returning the serialized response
    pub async fn handle_text(&self, session_id: &str, text: &str) -> String {
        self.handle(session_id, text).await.to_json()
    }

    pub async fn handle(&self, session_id: &str, text: &str) -> Response {
        let request = match ClientRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Session {}: {}", session_id, e);
                return Response::error("ERROR", e.to_string());
            }
        };
        let kind = request.message_type().to_string();

        let result = match request {
            ClientRequest::StartPresenter { sdp_offer } => self
                .manager
                .start_presenter(session_id, &sdp_offer)
                .await
                .map(|answer| serde_json::json!({ "sdpAnswer": answer })),
            ClientRequest::StartCast { enable_encryption } => self
                .manager
                .start_cast(session_id, enable_encryption)
                .await
                .map(|()| Value::Null),
            ClientRequest::IceCandidate { candidate } => self
                .manager
                .add_ice_candidate(session_id, candidate)
                .await
                .map(|()| Value::Null),
            ClientRequest::Debug => self.manager.debug_snapshot(session_id).await,
            ClientRequest::Unknown(kind) => {
                tracing::info!("Session {}: ignoring unknown message type {}", session_id, kind);
                Ok(Value::Null)
            }
        };

        match result {
            Ok(data) => Response::data(kind, data),
            Err(e) => Response::error(kind, e.to_string()),
        }
    }

    pub async fn on_disconnect(&self, session_id: &str) {
        self.manager.close_session(session_id, "client disconnected").await;
    }
}
