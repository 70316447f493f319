//! Per-channel outbound: one FIFO queue and one send daemon task per channel.
//! Lines are sent in order with a minimum interval; rate-limited sends are retried after the
//! delay the network asked for.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use super::log::truncate_content_default;
use super::transport::{self, ImChannelCapabilities, ImTransport, SendError};

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RATE_LIMIT_RETRIES: usize = 3;
const QUEUE_CAPACITY: usize = 256;

/// Per-channel state.
struct ChannelSendState {
    last_send: Option<Instant>,
    retry_after: Option<Instant>,
}

impl ChannelSendState {
    /// Sleep until both the min interval and any rate-limit deadline have passed.
    async fn wait_turn(&self) {
        let now = Instant::now();
        let wait_until = self
            .retry_after
            .filter(|t| *t > now)
            .or_else(|| self.last_send.map(|t| t + MIN_INTERVAL).filter(|next| *next > now));
        if let Some(until) = wait_until {
            tokio::time::sleep_until(until).await;
        }
    }
}

/// Send one chunk, retrying on rate limits. Returns false when the chunk was dropped.
async fn send_chunk(
    channel_id: &str,
    chunk: &str,
    state: &mut ChannelSendState,
    transport: &Arc<dyn ImTransport>,
) -> bool {
    for _ in 0..=MAX_RATE_LIMIT_RETRIES {
        state.wait_turn().await;
        match transport.send(channel_id, chunk).await {
            Ok(()) => {
                state.last_send = Some(Instant::now());
                state.retry_after = None;
                return true;
            }
            Err(SendError::RateLimited { retry_after_secs }) => {
                state.retry_after = Some(Instant::now() + Duration::from_secs_f64(retry_after_secs));
            }
            Err(SendError::Other(e)) => {
                warn!(channel_id, content = %truncate_content_default(chunk), error = %e, "send failed");
                return false;
            }
        }
    }
    warn!(channel_id, content = %truncate_content_default(chunk), "send dropped after repeated rate limiting");
    false
}

/// One send daemon for a single channel: drains that channel's FIFO queue in order.
async fn run_send_daemon_for_channel(
    mut rx: mpsc::Receiver<String>,
    channel_id: String,
    transport: Arc<dyn ImTransport>,
) {
    let max_len = transport.max_message_len();
    let mut state = ChannelSendState {
        last_send: None,
        retry_after: None,
    };

    while let Some(line) = rx.recv().await {
        for chunk in transport::chunk_message(&line, max_len) {
            send_chunk(&channel_id, &chunk, &mut state, &transport).await;
        }
    }
}

/// Hub that routes outbound lines to a per-channel FIFO queue and a dedicated daemon task per channel.
pub struct OutboundHub {
    channels: DashMap<String, mpsc::Sender<String>>,
    transport: Arc<dyn ImTransport>,
}

impl OutboundHub {
    pub fn new(transport: Arc<dyn ImTransport>) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            transport,
        })
    }

    /// Get or create the sender for this channel (creates a new FIFO queue and spawns a daemon task).
    pub fn sender_for(&self, channel_id: &str) -> mpsc::Sender<String> {
        self.channels
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
                let transport = Arc::clone(&self.transport);
                tokio::spawn(run_send_daemon_for_channel(rx, channel_id.to_string(), transport));
                tx
            })
            .clone()
    }

    /// Enqueue a line for the given channel (FIFO per channel).
    pub async fn send(&self, channel_id: &str, text: String) {
        let tx = self.sender_for(channel_id);
        if tx.send(text).await.is_err() {
            warn!(channel_id, "send daemon gone, line dropped");
        }
    }

    pub fn capabilities(&self) -> ImChannelCapabilities {
        self.transport.capabilities()
    }
}
