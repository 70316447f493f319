//! Chat networks known to the process and the channels joined on each.
//! `ChatSink` is the seam the bridge and the alert webhook send through; `ChatNetworks` is the
//! production implementation backed by one `OutboundHub` per network.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tracing::{debug, warn};

use super::daemon::OutboundHub;
use super::log::{network_of, truncate_content_default};

/// What the bridge needs from the chat side: send a line, and know where we are joined.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Queue one line for `channel_id` ("network:chat").
    async fn send_line(&self, channel_id: &str, text: &str);

    fn is_joined(&self, channel_id: &str) -> bool;

    /// Every joined channel on every network.
    fn joined_channels(&self) -> Vec<String>;

    /// Names of the networks this process is connected to.
    fn networks(&self) -> Vec<String>;
}

struct NetworkHandle {
    hub: Arc<OutboundHub>,
    joined: DashSet<String>,
}

/// Registry of connected chat networks, keyed by network name ("telegram").
#[derive(Default)]
pub struct ChatNetworks {
    networks: DashMap<String, NetworkHandle>,
}

impl ChatNetworks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a network under its transport's channel-id prefix.
    pub fn register(&self, hub: Arc<OutboundHub>) {
        let name = hub.capabilities().channel_id_prefix.to_string();
        self.networks.insert(
            name,
            NetworkHandle {
                hub,
                joined: DashSet::new(),
            },
        );
    }

    /// Record that the bot is present in `channel_id`. Unknown networks are ignored.
    pub fn mark_joined(&self, channel_id: &str) {
        match self.networks.get(network_of(channel_id)) {
            Some(handle) => {
                if handle.joined.insert(channel_id.to_string()) {
                    debug!(channel_id, "channel joined");
                }
            }
            None => warn!(channel_id, "mark_joined for unknown network"),
        }
    }
}

#[async_trait]
impl ChatSink for ChatNetworks {
    async fn send_line(&self, channel_id: &str, text: &str) {
        // Clone the hub out so no map guard is held across the await.
        let hub = self.networks.get(network_of(channel_id)).map(|h| Arc::clone(&h.hub));
        match hub {
            Some(hub) => {
                debug!(channel_id, content = %truncate_content_default(text), "outgoing");
                hub.send(channel_id, text.to_string()).await;
            }
            None => warn!(channel_id, "no network for channel, line dropped"),
        }
    }

    fn is_joined(&self, channel_id: &str) -> bool {
        self.networks
            .get(network_of(channel_id))
            .is_some_and(|h| h.joined.contains(channel_id))
    }

    fn joined_channels(&self) -> Vec<String> {
        self.networks
            .iter()
            .flat_map(|h| h.joined.iter().map(|c| c.key().clone()).collect::<Vec<_>>())
            .collect()
    }

    fn networks(&self) -> Vec<String> {
        self.networks.iter().map(|h| h.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::transport::{ImChannelCapabilities, ImTransport, SendError};

    struct NullTransport;

    #[async_trait]
    impl ImTransport for NullTransport {
        fn capabilities(&self) -> ImChannelCapabilities {
            ImChannelCapabilities {
                max_message_len: 100,
                channel_id_prefix: "telegram",
            }
        }

        async fn send(&self, _channel_id: &str, _text: &str) -> Result<(), SendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn membership_is_tracked_per_network() {
        let networks = ChatNetworks::new();
        networks.register(OutboundHub::new(Arc::new(NullTransport)));

        networks.mark_joined("telegram:1");
        networks.mark_joined("telegram:2");
        networks.mark_joined("irc:#x");

        assert!(networks.is_joined("telegram:1"));
        assert!(!networks.is_joined("irc:#x"));
        let mut joined = networks.joined_channels();
        joined.sort();
        assert_eq!(joined, vec!["telegram:1", "telegram:2"]);
        assert_eq!(networks.networks(), vec!["telegram"]);
    }
}
