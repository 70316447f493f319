//! Endpoint registry: one initialized Conduit client per (host, token), created on first use.
//!
//! The map entry for a key is a once-cell, inserted atomically; whoever reaches the cell first
//! runs the connect, concurrent callers for the same key wait on it, other keys are unaffected.
//! A failed connect leaves the cell empty so the next caller retries.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::info;

use super::conduit::{Conduit, ConduitConnector, ConduitError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointKey {
    host: String,
    token: String,
}

type Slot = Arc<OnceCell<Arc<dyn Conduit>>>;

pub struct EndpointRegistry {
    connector: Arc<dyn ConduitConnector>,
    endpoints: DashMap<EndpointKey, Slot>,
}

impl EndpointRegistry {
    pub fn new(connector: Arc<dyn ConduitConnector>) -> Self {
        Self {
            connector,
            endpoints: DashMap::new(),
        }
    }

    /// Memoized client for `(host, token)`.
    pub async fn client_for(&self, host: &str, token: &str) -> Result<Arc<dyn Conduit>, ConduitError> {
        let key = EndpointKey {
            host: host.to_string(),
            token: token.to_string(),
        };
        // The map guard is dropped before awaiting; only the cell is shared.
        let slot: Slot = Arc::clone(self.endpoints.entry(key).or_default().value());
        let client = slot
            .get_or_try_init(|| async {
                let client = self.connector.connect(host, token).await?;
                info!(host, "conduit endpoint created");
                Ok::<_, ConduitError>(client)
            })
            .await?;
        Ok(Arc::clone(client))
    }

    /// Number of endpoints created so far.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.endpoints.iter().filter(|e| e.value().initialized()).count()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
