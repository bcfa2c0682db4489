//! Environment lookups.
//!
//! Components never call `std::env` themselves. The binary hands a
//! [`ProcessEnv`] to the configuration layer and the identity provisioner;
//! tests hand them a plain `HashMap`.

use std::collections::HashMap;

/// Read-only view of named configuration values.
///
/// Empty values are reported as unset, matching how the vault tooling has
/// always treated `VAR=` lines in `.env` files.
pub trait EnvLookup: Send + Sync {
    /// Returns the value for `name`, or `None` if it is unset or empty.
    fn var(&self, name: &str) -> Option<String>;
}

/// Lookup backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|value| !value.is_empty()).cloned()
    }
}
