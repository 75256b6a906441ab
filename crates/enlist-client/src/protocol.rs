//! Gateway wire types and error classification.

use std::fmt;

use enlist_core::error::ProviderError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Identifier returned by the gateway. Accepts JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Number(n) => write!(f, "{n}"),
            RemoteId::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for RemoteId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RemoteId::Number(n) => serializer.serialize_i64(*n),
            RemoteId::Text(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Resolved {
    pub id: RemoteId,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResolveTargetRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ResolveIdentityRequest<'a> {
    Username { username: &'a str },
    Id { id: i64 },
}

#[derive(Debug, Serialize)]
pub(crate) struct InviteRequest<'a> {
    pub identity: &'a RemoteId,
}

/// Error body returned by the gateway on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct GatewayError {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// Map a failed gateway response onto the closed provider error set.
///
/// `retry_after_header` is the raw `Retry-After` header, consulted only when
/// the body carries no `retry_after`.
pub fn classify_error(
    status: StatusCode,
    body: &str,
    retry_after_header: Option<&str>,
) -> ProviderError {
    let parsed: GatewayError = serde_json::from_str(body).unwrap_or_default();
    let retry_after = parsed
        .retry_after
        .or_else(|| retry_after_header.and_then(|h| h.trim().parse().ok()));

    match parsed.error.as_str() {
        // A flood signal without a retry time escalates to the account cooldown.
        "FLOOD_WAIT" => match retry_after {
            Some(seconds) => ProviderError::FloodWait { seconds },
            None => ProviderError::PeerFlood,
        },
        "PEER_FLOOD" => ProviderError::PeerFlood,
        "USER_PRIVACY_RESTRICTED" => ProviderError::PrivacyRestricted,
        "USERNAME_NOT_OCCUPIED" => ProviderError::NotFound(
            parsed.message.unwrap_or_else(|| "username not occupied".into()),
        ),
        _ if status == StatusCode::TOO_MANY_REQUESTS => match retry_after {
            Some(seconds) => ProviderError::FloodWait { seconds },
            None => ProviderError::PeerFlood,
        },
        _ if status == StatusCode::NOT_FOUND => ProviderError::NotFound(describe(&parsed, body)),
        _ => ProviderError::Other(format!("HTTP {}: {}", status.as_u16(), describe(&parsed, body))),
    }
}

fn describe(parsed: &GatewayError, body: &str) -> String {
    if let Some(message) = &parsed.message {
        return message.clone();
    }
    if !parsed.error.is_empty() {
        return parsed.error.clone();
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}
