//! Per-click bookkeeping around a redirect: who clicked (anonymized), the
//! attribution cookie, and the background writer that persists click events.

pub mod click_logger;
pub mod client_ip;
pub mod cookie;

pub use click_logger::{ClickLogger, ClickSink};
pub use client_ip::{anonymize_ip, extract_client_ip, hash_user_agent, user_agent_hash};
pub use cookie::{AttributionCookies, AttributionSigner, AttributionStatus};
