//! Secret and flag lookup
//!
//! Credentials and switches such as the dry-run flag come from an opaque
//! key/value source. Absence is a normal answer, not an error.

use std::collections::HashMap;

/// Opaque key lookup.
pub trait SecretSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;

    /// Interpret a value as a boolean switch (`1`, `true`, `yes`, `on`).
    fn flag(&self, key: &str) -> bool {
        self.lookup(key).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

/// Reads `{PREFIX}_{KEY}` environment variables (key upper-cased).
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.to_ascii_uppercase())
    }
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::new("FEEDLINE")
    }
}

impl SecretSource for EnvSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key))
            .ok()
            .filter(|v| !v.is_empty())
    }
}

/// Fixed in-memory secrets (tests, local runs).
#[derive(Debug, Clone, Default)]
pub struct MapSecrets(HashMap<String, String>);

impl MapSecrets {
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

impl SecretSource for MapSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}
