//! phabrelay core: relays Phabricator references, feed activity and Icinga alerts into chat.
//! No HTTP server here; the binary in `server/` wires the webhook and the runtime.

pub mod alert;
pub mod config;
pub mod im;
pub mod phab;
