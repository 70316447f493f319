//! IM worker: take (channel_id, text) from the inbound queue and hand it to the bridge.
//! The bridge spawns its own work per line, so the receiver never waits on remote calls.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::phab::PhabBridge;

/// Inbound line from any chat network.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(channel_id: String, text: String) -> Self {
        Self { channel_id, text }
    }
}

pub async fn run_worker(mut inbound_rx: mpsc::Receiver<InboundMessage>, bridge: Arc<PhabBridge>) {
    while let Some(msg) = inbound_rx.recv().await {
        bridge.handle_message(&msg.channel_id, &msg.text);
    }
    info!("inbound queue closed, worker exiting");
}
