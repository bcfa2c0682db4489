//! Certificate-authenticated credential retrieval from a CyberArk-style
//! Central Credential Provider.
//!
//! A [`client::VaultClient`] provisions a TLS client identity from one of
//! several certificate sources, then fetches many credentials concurrently
//! with a bound on in-flight lookups and per-item error isolation.

pub mod client;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod env;
pub mod fetcher;
pub mod identity;
pub mod query;
pub mod transport;
