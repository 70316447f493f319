//! phabrelay server: Axum webhook for Icinga. Chat networks and the bridge live in core.

mod web_server;

pub use web_server::{alert_router, run_alert_server};
