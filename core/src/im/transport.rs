//! IM transport abstraction: "send one line" for the unified send daemon, plus line wrapping.
//! Each chat network declares its capabilities; the daemon chunks anything longer than
//! `max_message_len` before calling `send`.

use async_trait::async_trait;
use thiserror::Error;

use super::log::floor_char_boundary;

/// Error from sending a message. Rate-limited responses can be retried after a delay.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// API returned 429; retry after this many seconds.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },
    /// Other error (network, auth, bad channel id, etc.).
    #[error("{0}")]
    Other(String),
}

/// Capabilities a chat network declares to the send daemon.
#[derive(Clone, Debug)]
pub struct ImChannelCapabilities {
    /// Max length in bytes for a single message.
    pub max_message_len: usize,
    /// Prefix for channel_id (e.g. "telegram") for routing and logging.
    pub channel_id_prefix: &'static str,
}

/// Transport that can send a line to one channel. Implemented per chat network.
#[async_trait]
pub trait ImTransport: Send + Sync {
    fn capabilities(&self) -> ImChannelCapabilities;

    /// Max length for a single message (convenience; equals capabilities().max_message_len).
    fn max_message_len(&self) -> usize {
        self.capabilities().max_message_len
    }

    /// Send `text` to the channel identified by `channel_id` (e.g. "telegram:123").
    /// Caller guarantees `text.len() <= max_message_len()`.
    async fn send(&self, channel_id: &str, text: &str) -> Result<(), SendError>;
}

/// Split text into chunks of at most `max_len` bytes, trying to break at newlines.
/// Used by the send daemon for lines longer than the transport allows.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (chunk, next) = if rest.len() <= max_len {
            (rest, "")
        } else {
            let end = first_split_point(rest, max_len);
            let slice = &rest[..end];
            let break_at = slice.rfind('\n').map(|i| i + 1).unwrap_or(end);
            (&rest[..break_at], &rest[break_at..])
        };
        chunks.push(chunk.to_string());
        rest = next;
    }
    chunks
}

/// Word-wrap a reply into lines of at most `max_len` bytes. Breaks at whitespace when the
/// window has any, otherwise hard-breaks on a char boundary. Whitespace at breaks is dropped.
pub fn wrap_line(text: &str, max_len: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        if rest.len() <= max_len {
            lines.push(rest.to_string());
            break;
        }
        let end = first_split_point(rest, max_len);
        let (line, next) = if rest[end..].starts_with(char::is_whitespace) {
            (&rest[..end], &rest[end..])
        } else {
            match rest[..end].rfind(char::is_whitespace) {
                Some(i) if i > 0 => (&rest[..i], &rest[i..]),
                _ => (&rest[..end], &rest[end..]),
            }
        };
        lines.push(line.trim_end().to_string());
        rest = next.trim_start();
    }
    lines
}

/// Char-boundary split point <= max_len, but always at least one char so callers make progress.
fn first_split_point(s: &str, max_len: usize) -> usize {
    match floor_char_boundary(s, max_len) {
        0 => s.chars().next().map(char::len_utf8).unwrap_or(0),
        n => n,
    }
}
