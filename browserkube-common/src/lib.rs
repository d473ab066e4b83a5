//! Shared building blocks for the BrowserKube workspace:
//! - Custom resource definitions (Browser, BrowserSet, SessionResult)
//! - WebDriver capability and wire-protocol types
//! - Reverse time-ordered session identifiers
//! - Fan-out broadcaster and event batcher
//! - WebSocket reverse proxy with message middleware

pub mod broadcast;
pub mod caps;
pub mod crd;
pub mod revuuid;
pub mod wdproto;
pub mod wsproxy;
