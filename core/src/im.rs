//! IM (instant messaging) plumbing: chat networks, per-channel send daemon, inbound worker.
//! Only channels::telegram touches teloxide; everything else talks to `ChatSink`.

pub mod channels;
pub mod daemon;
pub mod log;
pub mod network;
pub mod transport;
pub mod worker;

pub use channels::telegram;
pub use network::{ChatNetworks, ChatSink};
