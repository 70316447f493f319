//! Logging helpers shared by the chat plumbing and the bridge.
//! Channel ids look like "telegram:-100123"; the part before ':' is the network.

use std::borrow::Cow;

const CONTENT_LOG_MAX_LEN: usize = 120;

/// Network part of a channel id ("telegram:123" -> "telegram"). "?" when there is no separator.
#[inline]
pub fn network_of(channel_id: &str) -> &str {
    match channel_id.split_once(':') {
        Some((network, _)) if !network.is_empty() => network,
        _ => "?",
    }
}

/// Largest index <= `max_len` that falls on a char boundary of `s`.
pub(crate) fn floor_char_boundary(s: &str, max_len: usize) -> usize {
    if max_len >= s.len() {
        return s.len();
    }
    let mut i = max_len;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Truncate message content for logging (avoid huge dumps).
#[inline]
pub fn truncate_content(content: &str, max_len: usize) -> Cow<'_, str> {
    if content.len() <= max_len {
        Cow::Borrowed(content)
    } else {
        let end = floor_char_boundary(content, max_len);
        Cow::Owned(format!("{}... ({} bytes)", &content[..end], content.len()))
    }
}

#[inline]
pub fn truncate_content_default(content: &str) -> Cow<'_, str> {
    truncate_content(content, CONTENT_LOG_MAX_LEN)
}
