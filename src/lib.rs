//! dohgate - a geo-routed DNS-over-HTTPS resolving proxy.
//!
//! Queries arrive as JSON over HTTP and are answered from one of three
//! sources, in priority order: a static block-list, a table of preferred
//! addresses for specific domains, or an upstream DoH resolver picked by
//! the requester's origin region, with forwarded answers cached by
//! (name, record type).

pub mod cache;
pub mod config;
pub mod dns;
pub mod metrics;
pub mod resolver;
pub mod rules;
pub mod server;
pub mod upstream;
