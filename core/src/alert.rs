//! Icinga notifications: validate a webhook delivery and relay it as one chat line.
//!
//! Deliveries arrive as `POST /icinga/<network>.<channel>` with a JSON body; the HTTP layer
//! hands the path target, content type and body to [`handle_webhook`] and writes back the
//! `(status, body)` it returns.

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::im::ChatSink;

/// Body for GET on the webhook route.
pub const GET_RESPONSE: &str = "This endpoint only supports POST requests.";

const ERROR_RESPONSE: &str = "Bad request!";

pub const NOTIFICATION_TYPES: &[&str] = &[
    "PROBLEM",
    "RECOVERY",
    "ACKNOWLEDGEMENT",
    "FLAPPINGSTART",
    "FLAPPINGSTOP",
    "FLAPPINGDISABLED",
    "DOWNTIMESTART",
    "DOWNTIMEEND",
    "DOWNTIMECANCELLED",
];

pub const STATES: &[&str] = &["UP", "DOWN", "UNREACHABLE", "OK", "WARNING", "UNKNOWN", "CRITICAL"];

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Wrong Content-Type: only application/json supported.")]
    WrongContentType,

    #[error("Invalid notification: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Must pass network.channel as argument")]
    BadTarget,

    #[error("Unknown network {0}")]
    UnknownNetwork(String),

    #[error("Bot not joined to channel {0}")]
    NotJoined(String),

    #[error("Unknown state {0}")]
    UnknownState(String),

    #[error("Unknown notification type {0}")]
    UnknownNotificationType(String),
}

/// Notification as posted by the Icinga notification command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IcingaNotification {
    pub notification_type: String,
    pub state: String,
    pub host: String,
    #[serde(default)]
    pub service: Option<String>,
    pub message: String,
}

impl IcingaNotification {
    pub fn validate(&self) -> Result<(), AlertError> {
        if !STATES.contains(&self.state.as_str()) {
            return Err(AlertError::UnknownState(self.state.clone()));
        }
        if !NOTIFICATION_TYPES.contains(&self.notification_type.as_str()) {
            return Err(AlertError::UnknownNotificationType(self.notification_type.clone()));
        }
        Ok(())
    }
}

/// The chat line for `n`. Host checks and service checks read differently.
pub fn format_notification(n: &IcingaNotification) -> String {
    match n.service.as_deref().filter(|s| !s.is_empty()) {
        Some(service) => format!(
            "icinga {}: service {} on {} is {}: {}",
            n.notification_type, service, n.host, n.state, n.message
        ),
        None => format!(
            "icinga {}: host {} is {}: {}",
            n.notification_type, n.host, n.state, n.message
        ),
    }
}

/// `<network>.<channel>` -> channel id `<network>:<channel>`. The channel part may itself
/// contain dots.
fn channel_id_for_target(target: &str) -> Result<(String, String), AlertError> {
    match target.split_once('.') {
        Some((network, channel)) if !network.is_empty() && !channel.is_empty() => {
            Ok((network.to_string(), format!("{network}:{channel}")))
        }
        _ => Err(AlertError::BadTarget),
    }
}

async fn deliver(
    target: &str,
    content_type: Option<&str>,
    body: &[u8],
    sink: &dyn ChatSink,
) -> Result<String, AlertError> {
    if !content_type.is_some_and(|ct| ct.starts_with("application/json")) {
        return Err(AlertError::WrongContentType);
    }
    let notification: IcingaNotification = serde_json::from_slice(body)?;
    let (network, channel_id) = channel_id_for_target(target)?;
    if !sink.networks().iter().any(|n| *n == network) {
        return Err(AlertError::UnknownNetwork(network));
    }
    if !sink.is_joined(&channel_id) {
        return Err(AlertError::NotJoined(channel_id));
    }
    notification.validate()?;
    let line = format_notification(&notification);
    sink.send_line(&channel_id, &line).await;
    Ok(channel_id)
}

/// Handle one webhook delivery. Returns (status_code, response_body).
pub async fn handle_webhook(
    target: &str,
    content_type: Option<&str>,
    body: &[u8],
    sink: &dyn ChatSink,
) -> (u16, String) {
    match deliver(target, content_type, body, sink).await {
        Ok(channel_id) => {
            info!(channel_id = %channel_id, "icinga notification relayed");
            (200, String::new())
        }
        Err(e) => {
            warn!(webhook_target = target, error = %e, "icinga notification rejected");
            (400, format!("{ERROR_RESPONSE}\n\n{e}\n"))
        }
    }
}
