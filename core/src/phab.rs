//! Phabricator bridge: answers object references in chat and announces feed activity.
//!
//! `PhabBridge` owns the shared state (endpoint registry, caches, watermarks) and is the only
//! thing the rest of the process talks to.

pub mod cache;
pub mod conduit;
pub mod endpoint;
pub mod feed;
pub mod format;
pub mod model;
pub mod resolver;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::im::log::truncate_content_default;
use crate::im::ChatSink;
use conduit::ConduitConnector;
use endpoint::EndpointRegistry;
use feed::FeedPoller;
use resolver::ObjectResolver;
use scanner::ReferenceScanner;

pub struct PhabBridge {
    config: Arc<Config>,
    registry: Arc<EndpointRegistry>,
    scanner: Arc<ReferenceScanner>,
    poller: Arc<FeedPoller>,
}

impl PhabBridge {
    pub fn new(config: Arc<Config>, sink: Arc<dyn ChatSink>, connector: Arc<dyn ConduitConnector>) -> Arc<Self> {
        let registry = Arc::new(EndpointRegistry::new(connector));
        let resolver = Arc::new(ObjectResolver::new(Arc::clone(&config), Arc::clone(&registry)));
        let scanner = Arc::new(ReferenceScanner::new(Arc::clone(&resolver), Arc::clone(&sink)));
        let poller = Arc::new(FeedPoller::new(resolver, sink));
        Arc::new(Self {
            config,
            registry,
            scanner,
            poller,
        })
    }

    /// Foreground entry for every inbound line. Returns immediately; lookups run on a task.
    pub fn handle_message(&self, channel_id: &str, text: &str) -> Option<JoinHandle<()>> {
        if scanner::scan(text).is_empty() {
            return None;
        }
        info!(channel_id, content = %truncate_content_default(text), "references spotted");
        let scanner = Arc::clone(&self.scanner);
        let channel_id = channel_id.to_string();
        let text = text.to_string();
        Some(tokio::spawn(async move {
            scanner.handle_line(&channel_id, &text).await;
        }))
    }

    /// Start the recurring feed poll.
    pub fn spawn_poller(&self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.poller).run(period))
    }

    /// Create the process-wide endpoint up front so the first lookup does not pay for discovery.
    pub async fn warm_up(&self) {
        let defaults = &self.config.phabricator;
        let (Some(host), Some(token)) = (defaults.uri.as_deref(), defaults.token.as_deref()) else {
            info!("no default phabricator endpoint configured");
            return;
        };
        match self.registry.client_for(host, token).await {
            Ok(_) => info!(host, "default phabricator endpoint ready"),
            Err(e) => warn!(host, error = %e, "default phabricator endpoint unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testing::{forge_config, MockConduit, MockConnector, RecordingSink, ARDUMONT};

    #[tokio::test]
    async fn lines_without_references_spawn_nothing() {
        let connector = Arc::new(MockConnector::default());
        let bridge = PhabBridge::new(Arc::new(forge_config()), RecordingSink::new(), connector.clone());

        assert!(bridge.handle_message("telegram:1", "hello there").is_none());
        bridge.warm_up().await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn inbound_reference_gets_a_reply() {
        let conduit = MockConduit::forge();
        conduit.add_object("PHID-PSTE-3", "PSTE", "P3", "P3 trace", "https://forge.softwareheritage.org/P3");
        conduit.respond(
            "paste.search",
            json!({ "data": [{ "id": 3, "phid": "PHID-PSTE-3", "fields": { "title": "trace", "authorPHID": ARDUMONT } }] }),
        );
        let sink = RecordingSink::new();
        let bridge = PhabBridge::new(
            Arc::new(forge_config()),
            sink.clone(),
            Arc::new(MockConnector::with(conduit)),
        );

        bridge.handle_message("telegram:1", "look at P3").unwrap().await.unwrap();

        assert_eq!(
            sink.take_texts(),
            vec!["P3 (author: ardumont): trace <https://forge.softwareheritage.org/P3>".to_string()]
        );
    }
}
